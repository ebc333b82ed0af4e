use crate::server::telemetry::{
    increment_assignments, increment_assignments_rejected, increment_existence_checks,
    increment_reservations, increment_reservations_exhausted, record_rpc_duration,
};
use callme::{Allocator, AreaCode, PhoneNumber};
use callme_tonic_core::{
    Assignment, Error,
    proto::{
        AssignRequest, AssignResponse, ExistsRequest, ExistsResponse, ReserveRequest,
        ReserveResponse, phone_book_service_server::PhoneBookService,
    },
};
use std::time::Instant;
use tonic::{Request, Response, Status};

/// `PhoneBookService` backed by an [`Allocator`].
#[derive(Clone)]
pub struct PhonebookService {
    allocator: Allocator,
}

impl PhonebookService {
    pub const fn new(allocator: Allocator) -> Self {
        Self { allocator }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}

#[tonic::async_trait]
impl PhoneBookService for PhonebookService {
    #[tracing::instrument(skip_all, fields(phone_number = %req.get_ref().phone_number))]
    async fn exists(
        &self,
        req: Request<ExistsRequest>,
    ) -> Result<Response<ExistsResponse>, Status> {
        let start = Instant::now();
        increment_existence_checks();

        let number = PhoneNumber::try_from(req.into_inner())?;
        let exists = self.allocator.exists(&number).await.map_err(Error::from)?;

        record_rpc_duration("exists", elapsed_ms(start));
        Ok(Response::new(ExistsResponse { exists }))
    }

    /// Reserves a batch from the requested area code.
    ///
    /// `FAILED_PRECONDITION` means the area code is (temporarily) exhausted.
    #[tracing::instrument(skip_all, fields(area_code = req.get_ref().area_code))]
    async fn reserve(
        &self,
        req: Request<ReserveRequest>,
    ) -> Result<Response<ReserveResponse>, Status> {
        let start = Instant::now();
        let area_code = AreaCode::try_from(req.into_inner())?;

        let reservation = match self.allocator.reserve(area_code).await {
            Ok(reservation) => reservation,
            Err(e) => {
                if matches!(e, callme::Error::PoolExhausted { .. }) {
                    increment_reservations_exhausted();
                }
                return Err(Error::from(e).into());
            }
        };

        increment_reservations();
        record_rpc_duration("reserve", elapsed_ms(start));
        tracing::info!(ref_id = %reservation.ref_id, count = reservation.numbers.len(), "reserved");
        Ok(Response::new(reservation.into()))
    }

    #[tracing::instrument(skip_all, fields(ref_id = %req.get_ref().ref_id, user_id = req.get_ref().user_id))]
    async fn assign(
        &self,
        req: Request<AssignRequest>,
    ) -> Result<Response<AssignResponse>, Status> {
        let start = Instant::now();
        let Assignment {
            ref_id,
            phone_number,
            user,
        } = Assignment::try_from(req.into_inner())?;

        let assigned = match self.allocator.assign(&ref_id, &phone_number, user).await {
            Ok(assigned) => assigned,
            Err(e) => {
                if matches!(e, callme::Error::InvalidReservation) {
                    increment_assignments_rejected();
                }
                return Err(Error::from(e).into());
            }
        };

        increment_assignments();
        record_rpc_duration("assign", elapsed_ms(start));
        tracing::info!(%phone_number, "assigned");
        Ok(Response::new(AssignResponse { assigned }))
    }
}
