use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};
use async_trait::async_trait;

/// An upgrader that does nothing but hand the socket back. Used in tests
/// and as a placeholder while composing pipelines.
#[derive(Debug, Copy, Clone)]
pub struct DummyUpgrader {
    name: &'static [u8],
}

impl DummyUpgrader {
    pub fn new(name: &'static [u8]) -> Self {
        DummyUpgrader { name }
    }
}

impl UpgradeInfo for DummyUpgrader {
    type Info = &'static [u8];

    fn protocol_info(&self) -> Vec<Self::Info> {
        vec![self.name]
    }
}

#[async_trait]
impl<C: Send + 'static> Upgrader<C> for DummyUpgrader {
    type Output = C;

    async fn upgrade_inbound(self, socket: C, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(socket)
    }

    async fn upgrade_outbound(self, socket: C, _info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        Ok(socket)
    }
}
