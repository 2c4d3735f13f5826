use super::types::{AppOptions, ComponentState, ShutdownReason};
use crate::config::EyecapConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::orchestrator::StageOrchestrator;
use crate::preview::Preview;
use crate::prompt::BellCue;
use crate::settings::SharedSettings;
use crate::source::FrameSource;
use crate::stage::StagePlan;
use crate::storage::SessionStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

/// Wires the frame source, live settings, session orchestrator and
/// keyboard controls together and owns their lifecycle
pub struct RecorderApp {
    pub(super) config: EyecapConfig,
    pub(super) options: AppOptions,
    pub(super) event_bus: EventBus,
    pub(super) plan: StagePlan,

    // Components
    pub(super) frame_source: Arc<FrameSource>,
    pub(super) settings: SharedSettings,
    pub(super) preview: Arc<Preview>,
    pub(super) session: Arc<StageOrchestrator>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl RecorderApp {
    /// Build every component from `config`. Fails on an invalid stage plan
    /// or device address; nothing is started yet.
    pub fn new(config: EyecapConfig, options: AppOptions) -> Result<Self> {
        let plan = config.stage_plan()?;
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        let frame_source = Arc::new(FrameSource::new(config.device.clone(), event_bus.clone()));
        frame_source.configure(&config.device.address)?;

        let settings = SharedSettings::new(&config.processing);
        let preview = Arc::new(Preview::new(
            frame_source.clone(),
            Arc::new(settings.clone()),
        ));

        let mut session = StageOrchestrator::new(
            frame_source.clone(),
            Arc::new(settings.clone()),
            SessionStore::new(&config.storage),
            event_bus.clone(),
            config.session.clone(),
        );
        if options.bell {
            session = session.with_cue(Arc::new(BellCue));
        }

        let keyboard_handler = options.keyboard.then(|| {
            KeyboardInputHandler::new(
                event_bus.clone(),
                settings.clone(),
                Arc::clone(&preview),
                PathBuf::from(&config.storage.path),
                config.storage.jpeg_quality,
            )
        });

        info!(
            "Recorder ready: {} stages, device {}",
            plan.len(),
            config.device.address
        );

        Ok(Self {
            config,
            options,
            event_bus,
            plan,
            frame_source,
            settings,
            preview,
            session: Arc::new(session),
            keyboard_handler,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    pub fn session(&self) -> &StageOrchestrator {
        &self.session
    }

    pub fn frame_source(&self) -> &FrameSource {
        &self.frame_source
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        debug!("{} -> {:?}", component, state);
        self.component_states
            .lock()
            .await
            .insert(component.to_string(), state);
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    /// Snapshot of every registered component
    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }
}
