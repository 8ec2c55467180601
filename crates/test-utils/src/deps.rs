use std::sync::Arc;

use gantry::attest::{LocalArtifactRegistry, LocalSourceResolver};
use gantry::exec::ExecutionSubstrate;
use gantry::sign::{FileSecretStore, Signer};
use gantry::store::MemoryStore;
use gantry::types::SignerMode;
use gantry::EngineDeps;

/// Engine collaborators for tests: in-memory store, no signing, no
/// transparency, and the given (usually fake) substrate.
///
/// Clone `deps.store` before handing the deps to `execute_pipeline` to keep
/// a query handle for assertions.
pub fn memory_deps(substrate: Arc<dyn ExecutionSubstrate>) -> EngineDeps {
    EngineDeps {
        store: Arc::new(MemoryStore::new()),
        substrate,
        signer: Arc::new(Signer::new(
            SignerMode::None,
            None,
            Arc::new(FileSecretStore::new()),
            None,
        )),
        transparency: None,
        registry: Arc::new(LocalArtifactRegistry::new()),
        resolver: Arc::new(LocalSourceResolver::new()),
    }
}
