use evalengine_core::config::Config;
use evalengine_core::file_storage::FileStorage;
use evalengine_core::repository::Repository;
use evalengine_runners::CancelSet;

/// Shared handler state, mirroring the teacher's `AppState` bundle
/// (`gateway_util::AppStateData`): one clone-cheap struct threading the
/// repository, storage, and the worker's cancellation set through
/// `.with_state(...)`.
#[derive(Clone)]
pub struct AppState {
    pub repository: Repository,
    pub storage: FileStorage,
    pub cancel_set: CancelSet,
    pub config: Config,
}
