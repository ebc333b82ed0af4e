use crate::server::telemetry::{
    increment_sms_duplicates, increment_sms_failed, increment_sms_sent, record_rpc_duration,
};
use callme::{Sender, Sms};
use callme_tonic_core::{
    Error,
    proto::{
        SendManyRequest, SendManyResponse, SendOneRequest, SendOneResponse,
        sms_service_server::SmsService as SmsServiceApi,
    },
};
use futures::StreamExt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};

/// `SmsService` backed by a [`Sender`].
///
/// `shutdown` is cancelled when the server stops; batches still running are
/// cancelled with it.
#[derive(Clone)]
pub struct SmsService {
    sender: Sender,
    shutdown: CancellationToken,
}

impl SmsService {
    pub const fn new(sender: Sender, shutdown: CancellationToken) -> Self {
        Self { sender, shutdown }
    }

    fn ensure_running(&self) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl SmsServiceApi for SmsService {
    /// Sends one message.
    ///
    /// The send runs on its own task so a client that goes away mid-call
    /// still leaves its idempotency key released, never stuck as a
    /// placeholder.
    #[tracing::instrument(skip_all)]
    async fn send_one(
        &self,
        req: Request<SendOneRequest>,
    ) -> Result<Response<SendOneResponse>, Status> {
        let start = Instant::now();
        self.ensure_running()?;
        let sms = Sms::try_from(req.into_inner())?;

        let token = self.shutdown.child_token();
        let _guard = token.clone().drop_guard();
        let sender = self.sender.clone();
        let outcome = tokio::spawn(async move { sender.send_one(sms, &token).await })
            .await
            .map_err(|e| Status::internal(format!("Internal error: {e}")))?;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                increment_sms_failed(1);
                return Err(Error::from(e).into());
            }
        };

        if outcome.message.is_some() {
            increment_sms_duplicates(1);
        } else {
            increment_sms_sent(1);
        }
        record_rpc_duration("send_one", start.elapsed().as_secs_f64() * 1_000.0);
        Ok(Response::new(outcome.into()))
    }

    /// Sends a client-streamed batch.
    ///
    /// Per-message failures come back in `errors`. A broken request stream
    /// fails the call once the messages already started have finished.
    #[tracing::instrument(skip_all)]
    async fn send_many(
        &self,
        req: Request<Streaming<SendManyRequest>>,
    ) -> Result<Response<SendManyResponse>, Status> {
        let start = Instant::now();
        self.ensure_running()?;

        let requests = req.into_inner().map(|item| match item {
            // A missing message fails validation like any other bad field.
            Ok(req) => Ok(req.sms.map(Sms::from).unwrap_or_default()),
            Err(status) => Err(Error::StreamRead {
                context: status.message().to_owned(),
            }),
        });

        let report = self.sender.send_many(requests, &self.shutdown).await?;

        let failed = report.errors.len() as u64;
        increment_sms_sent(report.sent);
        increment_sms_failed(failed);
        increment_sms_duplicates(report.duplicates);
        record_rpc_duration("send_many", start.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(
            sent = report.sent,
            duplicates = report.duplicates,
            failed,
            "batch finished"
        );
        Ok(Response::new(SendManyResponse {
            errors: report.errors,
        }))
    }
}
