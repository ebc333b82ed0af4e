use crate::proto::{ExistsRequest, phone_book_service_client::PhoneBookServiceClient};
use async_trait::async_trait;
use callme::{NumberLookup, PhoneNumber};
use tonic::{
    Code,
    transport::{Channel, Endpoint},
};

/// [`NumberLookup`] backed by a remote `PhoneBookService`.
///
/// Cloning is cheap; all clones share one HTTP/2 channel.
#[derive(Clone, Debug)]
pub struct PhonebookLookup {
    client: PhoneBookServiceClient<Channel>,
}

impl PhonebookLookup {
    /// Builds a client that connects on first use and reconnects on failure.
    pub fn connect_lazy(url: impl Into<String>) -> callme::Result<Self> {
        let url = url.into();
        let endpoint = Endpoint::from_shared(url.clone())
            .map_err(|e| callme::Error::invalid(format!("invalid phonebook url {url:?}: {e}")))?;
        Ok(Self::from_channel(endpoint.connect_lazy()))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: PhoneBookServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl NumberLookup for PhonebookLookup {
    async fn exists(&self, number: &PhoneNumber) -> callme::Result<bool> {
        let request = ExistsRequest {
            phone_number: number.as_str().to_owned(),
        };
        match self.client.clone().exists(request).await {
            Ok(response) => Ok(response.into_inner().exists),
            Err(status) if status.code() == Code::Cancelled => Err(callme::Error::Cancelled),
            Err(status) => {
                tracing::warn!(%number, code = ?status.code(), message = status.message(), "phonebook lookup failed");
                Err(callme::Error::lookup(format!(
                    "{:?}: {}",
                    status.code(),
                    status.message()
                )))
            }
        }
    }
}
