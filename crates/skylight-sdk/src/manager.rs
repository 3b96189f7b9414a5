use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use skylight_bus::MessagingTransport;
use skylight_messaging::{ConnectionWatchdog, WatchdogEvent};
use skylight_proto::{AssignmentIdentity, AssignmentNew};
use tokio::sync::broadcast;
use tracing::info;

use crate::api::AssignmentApi;
use crate::client::ApiClient;
use crate::config::{ClientSettings, ConfigError, Credentials, MqttConnectionType};
use crate::dispatch::RequestDispatcher;
use crate::error::SdkResult;
use crate::estimate::PayloadBudget;
use crate::splitter::AssignmentSplitter;

#[derive(Debug, Default)]
struct ManagerState {
    settings: ClientSettings,
    connected: bool,
}

/// Entry point for an integration: owns the REST client, the messaging
/// transport and the watchdog that keeps the transport alive.
pub struct Manager<T: MessagingTransport + 'static> {
    credentials: Credentials,
    api: Arc<dyn AssignmentApi>,
    messaging: Arc<T>,
    watchdog: ConnectionWatchdog<T>,
    state: RwLock<ManagerState>,
}

impl<T: MessagingTransport + 'static> Manager<T> {
    pub fn new(credentials: Credentials, messaging: Arc<T>) -> Self {
        let api: Arc<dyn AssignmentApi> = Arc::new(ApiClient::from_credentials(&credentials));
        Self::with_api(credentials, api, messaging)
    }

    pub fn with_api(credentials: Credentials, api: Arc<dyn AssignmentApi>, messaging: Arc<T>) -> Self {
        let watchdog = ConnectionWatchdog::new(messaging.clone(), credentials.integration_id.clone());
        Self {
            credentials,
            api,
            messaging,
            watchdog,
            state: RwLock::new(ManagerState::default()),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.watchdog = self.watchdog.with_interval(interval);
        self
    }

    pub fn integration_id(&self) -> &str {
        &self.credentials.integration_id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn api(&self) -> &Arc<dyn AssignmentApi> {
        &self.api
    }

    pub fn messaging(&self) -> &Arc<T> {
        &self.messaging
    }

    pub fn settings(&self) -> ClientSettings {
        self.state.read().settings
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn watchdog_events(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.watchdog.subscribe_events()
    }

    /// Address the messaging transport should dial for the configured
    /// connection type.
    pub fn broker_endpoint(&self) -> String {
        self.settings()
            .mqtt_connection_type
            .broker_endpoint(&self.credentials)
    }

    pub fn set_max_payload_bytes(&self, max_bytes: usize) -> Result<(), ConfigError> {
        let budget = PayloadBudget::new(max_bytes)?;
        self.update_before_connect("max payload size", |settings| {
            settings.max_payload = budget
        })
    }

    pub fn set_mqtt_connection_type(&self, connection_type: MqttConnectionType) -> Result<(), ConfigError> {
        self.update_before_connect("mqtt connection type", |settings| {
            settings.mqtt_connection_type = connection_type
        })
    }

    pub fn set_max_in_flight(&self, max_in_flight: usize) -> Result<(), ConfigError> {
        if max_in_flight == 0 {
            return Err(ConfigError::InvalidSetting(
                "max in-flight requests must be greater than zero".into(),
            ));
        }
        self.state.write().settings.max_in_flight = max_in_flight;
        Ok(())
    }

    fn update_before_connect(
        &self,
        setting: &'static str,
        update: impl FnOnce(&mut ClientSettings),
    ) -> Result<(), ConfigError> {
        let mut state = self.state.write();
        if state.connected {
            return Err(ConfigError::AlreadyConnected(setting));
        }
        update(&mut state.settings);
        Ok(())
    }

    /// Connects the messaging transport and arms the watchdog. Connecting an
    /// already connected manager is a no-op.
    pub async fn connect(&self) -> SdkResult<()> {
        {
            let mut state = self.state.write();
            if state.connected {
                return Ok(());
            }
            state.connected = true;
        }
        info!(
            target = "skylight.manager",
            integration_id = %self.credentials.integration_id,
            endpoint = %self.broker_endpoint(),
            "connecting"
        );
        if let Err(err) = self.watchdog.start().await {
            self.state.write().connected = false;
            return Err(err.into());
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> SdkResult<()> {
        let was_connected = std::mem::replace(&mut self.state.write().connected, false);
        if !was_connected {
            return Ok(());
        }
        self.watchdog.stop().await?;
        info!(
            target = "skylight.manager",
            integration_id = %self.credentials.integration_id,
            "disconnected"
        );
        Ok(())
    }

    pub fn splitter(&self) -> AssignmentSplitter<dyn AssignmentApi> {
        let settings = self.settings();
        AssignmentSplitter::new(self.api.clone(), settings.max_payload)
            .with_dispatcher(RequestDispatcher::new(settings.max_in_flight))
    }

    /// Submits an assignment of any size. The integration id is filled in
    /// when the document leaves it unset.
    pub async fn submit_assignment(&self, mut assignment: AssignmentNew) -> SdkResult<AssignmentIdentity> {
        assignment
            .integration_id
            .get_or_insert_with(|| self.credentials.integration_id.clone());
        self.splitter().submit(assignment).await
    }
}
