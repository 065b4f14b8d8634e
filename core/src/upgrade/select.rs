use async_trait::async_trait;

use crate::either::{EitherName, EitherOutput};
use crate::transport::TransportError;
use crate::upgrade::{UpgradeInfo, Upgrader};

/// Select two upgrades into one. Supports all the protocols supported by either
/// sub-upgrade.
///
/// The protocols supported by the first element have a higher priority.
#[derive(Debug, Copy, Clone)]
pub struct Selector<A, B>(A, B);

impl<A, B> Selector<A, B> {
    /// Combines two upgraders into an `Selector`.
    ///
    /// The protocols supported by the first element have a higher priority.
    pub fn new(a: A, b: B) -> Self {
        Selector(a, b)
    }
}

impl<A, B> UpgradeInfo for Selector<A, B>
where
    A: UpgradeInfo,
    B: UpgradeInfo,
{
    type Info = EitherName<A::Info, B::Info>;

    fn protocol_info(&self) -> Vec<Self::Info> {
        let mut v = Vec::default();
        v.extend(self.0.protocol_info().into_iter().map(EitherName::A));
        v.extend(self.1.protocol_info().into_iter().map(EitherName::B));
        v
    }
}

#[async_trait]
impl<A, B, C> Upgrader<C> for Selector<A, B>
where
    A: Upgrader<C> + Send,
    B: Upgrader<C> + Send,
    C: Send + 'static,
{
    type Output = EitherOutput<A::Output, B::Output>;

    async fn upgrade_inbound(self, socket: C, info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => Ok(EitherOutput::A(self.0.upgrade_inbound(socket, info).await?)),
            EitherName::B(info) => Ok(EitherOutput::B(self.1.upgrade_inbound(socket, info).await?)),
        }
    }

    async fn upgrade_outbound(self, socket: C, info: <Self as UpgradeInfo>::Info) -> Result<Self::Output, TransportError> {
        match info {
            EitherName::A(info) => Ok(EitherOutput::A(self.0.upgrade_outbound(socket, info).await?)),
            EitherName::B(info) => Ok(EitherOutput::B(self.1.upgrade_outbound(socket, info).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::{DummyUpgrader, ProtocolName};

    #[test]
    fn protocols_keep_priority_order() {
        let selector = Selector::new(DummyUpgrader::new(b"/first"), DummyUpgrader::new(b"/second"));
        let infos = selector.protocol_info();
        let names: Vec<_> = infos.iter().map(|i| i.protocol_name().to_vec()).collect();
        assert_eq!(names, vec![b"/first".to_vec(), b"/second".to_vec()]);
    }

    #[test]
    fn dispatches_on_negotiated_branch() {
        let selector = Selector::new(DummyUpgrader::new(b"/first"), DummyUpgrader::new(b"/second"));
        let info = selector.protocol_info().into_iter().nth(1).unwrap();

        futures::executor::block_on(async move {
            let output = selector.upgrade_outbound(100, info).await.unwrap();
            match output {
                EitherOutput::B(v) => assert_eq!(v, 100),
                EitherOutput::A(_) => panic!("wrong branch"),
            }
        });
    }
}
