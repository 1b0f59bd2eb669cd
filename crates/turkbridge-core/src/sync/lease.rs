use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind};
use crate::persistence::TabularStore;
use crate::sync::SyncResult;
use crate::sync::statements::{acquire_lease, release_lease};

pub const SYNC_LEASE_NAME: &str = "turkbridge.sync";

/// Exclusive, expiring claim on the sync workflow, backed by a row in
/// `sync_leases`. Released when dropped.
pub struct SyncLease<'a> {
    store: &'a dyn TabularStore,
    holder: String,
    ttl_secs: i64,
    released: bool,
}

impl<'a> SyncLease<'a> {
    /// Fails with [`CoreErrorKind::LeaseHeld`] while another holder's lease is
    /// unexpired. Re-acquiring as the current holder renews the lease.
    pub fn acquire(
        store: &'a dyn TabularStore,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> SyncResult<Self> {
        let holder = holder.into();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        claim(store, &holder, ttl_secs)?;

        tracing::debug!(lease = SYNC_LEASE_NAME, holder = %holder, "acquired sync lease");
        Ok(Self {
            store,
            holder,
            ttl_secs,
            released: false,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Pushes the expiry a full TTL past now. Fails with
    /// [`CoreErrorKind::LeaseHeld`] once another holder has taken the lease
    /// over, in which case the caller must stop touching shared state.
    pub fn renew(&self) -> SyncResult<()> {
        claim(self.store, &self.holder, self.ttl_secs)
    }

    pub fn release(mut self) -> SyncResult<()> {
        self.released = true;
        self.store
            .execute(&release_lease(SYNC_LEASE_NAME, &self.holder))
            .map(|_| ())
    }
}

fn claim(store: &dyn TabularStore, holder: &str, ttl_secs: i64) -> SyncResult<()> {
    let claimed = store.execute(&acquire_lease(SYNC_LEASE_NAME, holder, ttl_secs))?;
    if claimed == 0 {
        return Err(CoreError::new(
            CoreErrorKind::LeaseHeld,
            format!("sync lease '{SYNC_LEASE_NAME}' is held by another synchronizer"),
        ));
    }
    Ok(())
}

impl Drop for SyncLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(error) = self
            .store
            .execute(&release_lease(SYNC_LEASE_NAME, &self.holder))
        {
            tracing::warn!(
                lease = SYNC_LEASE_NAME,
                holder = %self.holder,
                kind = ?error.kind,
                message = %error.message,
                "failed to release sync lease; it will lapse at expiry"
            );
        }
    }
}
