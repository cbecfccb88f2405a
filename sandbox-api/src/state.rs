use sandbox_orchestrator::WorkspaceService;

#[derive(Clone)]
pub struct AppState {
    pub service: WorkspaceService,
}

impl AppState {
    pub fn new(service: WorkspaceService) -> Self {
        Self { service }
    }
}
