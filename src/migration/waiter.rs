//! Binding Waiter
//!
//! Blocks until a claim and its volume both report the Bound phase.

use crate::config::PollPolicy;
use crate::domain::ports::{ClusterClient, PHASE_BOUND};
use crate::error::Result;
use crate::manifest::{claim_phase, volume_phase};
use crate::migration::poll::poll_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Waits for a claim/volume pair to bind
pub struct BindingWaiter<'a> {
    cluster: &'a dyn ClusterClient,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl<'a> BindingWaiter<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, policy: PollPolicy, cancel: CancellationToken) -> Self {
        Self {
            cluster,
            policy,
            cancel,
        }
    }

    /// Read both phases once
    async fn both_bound(&self, namespace: &str, claim: &str, volume: &str) -> Result<bool> {
        let (claim_obj, volume_obj) = futures::try_join!(
            self.cluster.get_claim(namespace, claim),
            self.cluster.get_volume(volume),
        )?;
        let claim_state = claim_obj.as_ref().and_then(claim_phase);
        let volume_state = volume_obj.as_ref().and_then(volume_phase);
        debug!(
            claim = %claim,
            volume = %volume,
            claim_phase = ?claim_state,
            volume_phase = ?volume_state,
            "Binding check"
        );
        Ok(claim_state == Some(PHASE_BOUND) && volume_state == Some(PHASE_BOUND))
    }

    pub async fn wait_for_bound(&self, namespace: &str, claim: &str, volume: &str) -> Result<()> {
        let operation = format!("claim {}/{} and volume {} to bind", namespace, claim, volume);
        poll_until(&self.policy, &self.cancel, &operation, || async move {
            self.both_bound(namespace, claim, volume).await
        })
        .await?;
        info!(claim = %claim, volume = %volume, "Claim and volume bound");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::cluster::memory::{bound_claim, bound_volume, Faults, InMemoryCluster};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_already_bound() {
        let cluster = InMemoryCluster::new();
        cluster.add_claim(bound_claim("app1", "data-pvc", "pv-data", "ReadWriteOnce"));
        cluster.add_volume(bound_volume("app1", "pv-data", "data-pvc", "ReadWriteOnce", "kernel"));

        let waiter = BindingWaiter::new(&cluster, fast(), CancellationToken::new());
        waiter.wait_for_bound("app1", "data-pvc", "pv-data").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_volume_times_out() {
        let cluster = InMemoryCluster::new();
        cluster.add_claim(bound_claim("app1", "data-pvc", "pv-data", "ReadWriteOnce"));

        let waiter = BindingWaiter::new(&cluster, fast(), CancellationToken::new());
        let result = waiter.wait_for_bound("app1", "data-pvc", "pv-data").await;
        assert_matches!(result, Err(Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_cluster_keeps_polling_until_deadline() {
        let cluster = InMemoryCluster::new();
        cluster.set_faults(Faults {
            unreachable: true,
            ..Default::default()
        });

        let waiter = BindingWaiter::new(&cluster, fast(), CancellationToken::new());
        let err = waiter.wait_for_bound("app1", "c", "v").await.unwrap_err();
        assert_matches!(err, Error::Timeout { .. });
        assert!(cluster.journal().len() > 2);
    }
}
