//! Job -> signer lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Signer;
use crate::domain::JobId;

/// Signers currently usable, per job.
///
/// A job without an entry has no live signer (remote session not yet
/// established, or expired); its tasks cannot be signed until one is attached.
#[derive(Default, Clone)]
pub struct SignerRegistry {
    inner: Arc<RwLock<HashMap<JobId, Arc<dyn Signer>>>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, job_id: JobId, signer: Arc<dyn Signer>) {
        self.inner.write().await.insert(job_id, signer);
    }

    pub async fn detach(&self, job_id: JobId) -> Option<Arc<dyn Signer>> {
        self.inner.write().await.remove(&job_id)
    }

    pub async fn get(&self, job_id: JobId) -> Option<Arc<dyn Signer>> {
        self.inner.read().await.get(&job_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keys;
    use crate::signer::LocalSigner;

    #[tokio::test]
    async fn attach_get_detach() {
        let reg = SignerRegistry::new();
        let job = JobId::generate();
        assert!(reg.get(job).await.is_none());

        let keys = Keys::generate();
        let pk = keys.public_key();
        reg.attach(job, Arc::new(LocalSigner::new(keys))).await;
        assert_eq!(reg.get(job).await.map(|s| s.public_key()), Some(pk));

        assert!(reg.detach(job).await.is_some());
        assert!(reg.get(job).await.is_none());
    }
}
