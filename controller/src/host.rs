use std::{
    collections::BTreeMap,
    fs,
    future::IntoFuture,
    io::{ErrorKind, Write},
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use growbox_common::{
    execute_actions, ByteStore, Channel, ControlError, Controller, ControllerStatus,
    EngineAction, InboundMessage, OutboundMessage, OutputConfig, OutputDriver, RuntimeConfig, StoreError,
    TOPIC_CHAT_INBOUND, TOPIC_CHAT_OUTBOUND, TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

const INBOUND_QUEUE_DEPTH: usize = 32;

#[derive(Clone)]
struct AppState {
    status: watch::Receiver<ControllerStatus>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = DataDir::from_env();
    let mut runtime = data_dir.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    if runtime.owner_id.is_empty() {
        warn!("owner_id is empty; every chat sender will be refused");
    }
    info!(
        owner = %runtime.owner_id,
        model = runtime.light.model.as_str(),
        profile = runtime.light.profile.as_str(),
        poll_ms = runtime.poll_interval_ms,
        "runtime config loaded"
    );

    let settings = FileStore::open(data_dir.settings_path())?;
    let controller = Controller::boot(
        runtime.light,
        runtime.owner_id.clone(),
        settings,
        monotonic_ms(),
    )
    .context("settings store unavailable at boot")?;
    let irrigation = controller.state().irrigation.config();
    info!(
        interval_days = irrigation.interval_days,
        duration_seconds = irrigation.duration_seconds,
        auto_irrigate = irrigation.auto_irrigate,
        "irrigation settings loaded"
    );

    let mut mqtt_options = MqttOptions::new(
        "growbox-controller",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let link = MqttLink {
        client: mqtt,
        connected: Arc::new(AtomicBool::new(false)),
    };
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let (status_tx, status_rx) = watch::channel(controller.status());

    spawn_mqtt_loop(link.clone(), eventloop, inbound_tx);

    let control = ControlLoop {
        controller,
        outputs: SimulatedOutputs::new(runtime.outputs.clone()),
        inbound: inbound_rx,
        link,
        status: status_tx,
        poll_interval: Duration::from_millis(runtime.poll_interval_ms),
        publish_interval: Duration::from_millis(runtime.state_publish_interval_ms),
    };
    let control_task = tokio::task::spawn_blocking(move || control.run());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(AppState { status: status_rx });

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    serve_until_control_exits(listener, app, control_task).await
}

/// Serves HTTP until either side stops. The control loop never returns on
/// its own, so its end is always an error.
async fn serve_until_control_exits(
    listener: TcpListener,
    app: Router,
    control_task: JoinHandle<()>,
) -> anyhow::Result<()> {
    tokio::select! {
        served = axum::serve(listener, app).into_future() => {
            served.context("controller http server failed")?;
            anyhow::bail!("controller http server stopped")
        }
        joined = control_task => {
            joined.context("control loop panicked")?;
            anyhow::bail!("control loop exited")
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status.borrow().clone())
}

/// Publishing half of the broker connection, shared by the network task and
/// the control loop.
#[derive(Clone)]
struct MqttLink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Publish failures are logged here. Only a missing broker session is
    /// reported back.
    fn send(&self, message: &OutboundMessage) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::EndpointUnavailable);
        }

        match serde_json::to_vec(message) {
            Ok(body) => {
                if let Err(err) =
                    self.client
                        .try_publish(TOPIC_CHAT_OUTBOUND, QoS::AtLeastOnce, false, body)
                {
                    warn!("outbound chat publish failed: {err}");
                }
            }
            Err(err) => warn!("outbound chat serialization failed: {err}"),
        }
        Ok(())
    }

    fn publish_status(&self, status: &ControllerStatus) {
        if !self.is_connected() {
            return;
        }

        match serde_json::to_vec(status) {
            Ok(body) => {
                if let Err(err) =
                    self.client
                        .try_publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                {
                    warn!("controller state publish failed: {err}");
                }
            }
            Err(err) => warn!("controller state serialization failed: {err}"),
        }
    }
}

fn spawn_mqtt_loop(
    link: MqttLink,
    mut eventloop: rumqttc::EventLoop,
    inbound: mpsc::Sender<InboundMessage>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if message.topic != TOPIC_CHAT_INBOUND {
                        continue;
                    }
                    match InboundMessage::decode(&message.payload) {
                        Ok(decoded) => {
                            if let Err(err) = inbound.try_send(decoded) {
                                warn!("inbound queue full, dropping chat message: {err}");
                            }
                        }
                        Err(err) => warn!("dropping inbound chat payload: {err}"),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = link
                        .client
                        .try_subscribe(TOPIC_CHAT_INBOUND, QoS::AtLeastOnce)
                    {
                        warn!("chat subscription failed: {err}");
                    }
                    if let Err(err) = link.client.try_publish(
                        TOPIC_CONTROLLER_STATUS,
                        QoS::AtLeastOnce,
                        true,
                        "online",
                    ) {
                        warn!("availability publish failed: {err}");
                    }
                    link.connected.store(true, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(err) => {
                    if link.connected.swap(false, Ordering::Relaxed) {
                        warn!("mqtt connection lost: {err}");
                    } else {
                        debug!("mqtt poll error: {err}");
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Single owner of the controller. Runs on a blocking thread so an
/// irrigation pulse can hold the loop the same way it does on the board.
struct ControlLoop {
    controller: Controller<FileStore>,
    outputs: SimulatedOutputs,
    inbound: mpsc::Receiver<InboundMessage>,
    link: MqttLink,
    status: watch::Sender<ControllerStatus>,
    poll_interval: Duration,
    publish_interval: Duration,
}

impl ControlLoop {
    fn run(mut self) {
        let startup = self.controller.startup_actions();
        self.execute(startup);

        let mut was_connected = false;
        let mut last_publish: Option<Instant> = None;

        loop {
            let connected = self.link.is_connected();
            if connected && !was_connected {
                let greeting = self.controller.endpoint_connected();
                self.execute(greeting);
            } else if !connected && was_connected {
                warn!("messaging endpoint unavailable; skipping inbound commands");
            }
            was_connected = connected;

            if connected {
                while let Ok(message) = self.inbound.try_recv() {
                    debug!(sender = %message.sender, text = %message.text, "inbound command");
                    let actions = self
                        .controller
                        .handle_message(&message.sender, &message.text);
                    self.execute(actions);
                }
            }

            let actions = self.controller.poll(monotonic_ms());
            self.execute(actions);

            let status = self.controller.status();
            if last_publish.map_or(true, |at| at.elapsed() >= self.publish_interval) {
                self.link.publish_status(&status);
                last_publish = Some(Instant::now());
            }
            self.status.send_replace(status);

            std::thread::sleep(self.poll_interval);
        }
    }

    fn execute(&mut self, actions: Vec<EngineAction>) {
        if actions.is_empty() {
            return;
        }
        let owner_id = self.controller.owner_id().to_string();
        for message in execute_actions(actions, &mut self.outputs, &owner_id) {
            if let Err(err) = self.link.send(&message) {
                warn!(
                    recipient = %message.recipient,
                    "{err}, dropping outbound message: {}",
                    message.text
                );
            }
        }
    }
}

/// Logs pin levels instead of driving hardware.
struct SimulatedOutputs {
    config: OutputConfig,
    levels: BTreeMap<Channel, bool>,
}

impl SimulatedOutputs {
    fn new(config: OutputConfig) -> Self {
        Self {
            config,
            levels: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    fn level(&self, channel: Channel) -> Option<bool> {
        self.levels.get(&channel).copied()
    }
}

impl OutputDriver for SimulatedOutputs {
    fn set_channel(&mut self, channel: Channel, on: bool) {
        let pin = self.config.pin(channel);
        let high = pin.level(on);
        self.levels.insert(channel, high);

        let level = if high { "high" } else { "low" };
        info!(channel = channel.as_str(), gpio = pin.gpio, on, level, "output changed");
    }

    fn block_for(&mut self, duration_ms: u64) {
        info!("blocking control loop for {duration_ms} ms");
        std::thread::sleep(Duration::from_millis(duration_ms));
    }
}

/// Settings slots kept as a JSON map, rewritten and synced on every write.
struct FileStore {
    path: PathBuf,
    slots: BTreeMap<String, u8>,
}

impl FileStore {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let slots = match fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
                warn!("{} is unreadable, starting from empty slots: {err}", path.display());
                BTreeMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        Ok(Self { path, slots })
    }

    fn persist(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(&self.slots)?;
        let mut file = fs::File::create(&self.path)?;
        file.write_all(&payload)?;
        file.sync_all()
    }
}

impl ByteStore for FileStore {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, StoreError> {
        Ok(self.slots.get(key).copied())
    }

    fn write_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        let previous = self.slots.insert(key.to_string(), value);

        if let Err(err) = self.persist() {
            match previous {
                Some(previous) => self.slots.insert(key.to_string(), previous),
                None => self.slots.remove(key),
            };
            warn!("settings write `{key}` failed: {err}");
            return Err(StoreError::Backend(format!("{}: {err}", self.path.display())));
        }

        debug!("settings slot `{key}` = {value}");
        Ok(())
    }
}

struct DataDir {
    root: PathBuf,
}

impl DataDir {
    fn from_env() -> Self {
        let root = std::env::var("GROWBOX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.growbox"));
        Self { root }
    }

    fn runtime_path(&self) -> PathBuf {
        self.root.join("runtime.json")
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        read_runtime_config(&self.runtime_path()).await
    }
}

async fn read_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = lookup("MQTT_PORT").and_then(|value| value.parse::<u16>().ok()) {
        runtime.network.mqtt_port = port;
    }
    if let Some(user) = lookup("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Some(pass) = lookup("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(owner) = lookup("GROWBOX_OWNER_ID") {
        runtime.owner_id = owner;
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use growbox_common::SettingsStore;

    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("growbox-{name}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = scratch_dir("reopen");
        let path = dir.join("settings.json");

        let mut store = SettingsStore::new(FileStore::open(path.clone()).unwrap());
        let defaults = store.init_defaults().unwrap();
        assert_eq!(defaults.interval_days, 5);
        store.backend_mut().write_u8("irr_int", 3).unwrap();

        let reopened = SettingsStore::new(FileStore::open(path).unwrap());
        assert_eq!(reopened.load().unwrap().interval_days, 3);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_settings_file_heals_to_defaults() {
        let dir = scratch_dir("corrupt");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        fs::write(&path, b"{\"irr_int\": 9000").unwrap();

        let mut store = SettingsStore::new(FileStore::open(path).unwrap());
        let config = store.init_defaults().unwrap();

        assert_eq!(config.interval_days, 5);
        assert_eq!(config.duration_seconds, 15);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("MQTT_HOST", "broker.local"),
            ("MQTT_PORT", "not-a-port"),
            ("GROWBOX_OWNER_ID", "555"),
        ]
        .into_iter()
        .collect();
        let mut runtime = RuntimeConfig::default();

        apply_env_overrides(&mut runtime, |key| {
            vars.get(key).map(|value| value.to_string())
        });

        assert_eq!(runtime.network.mqtt_host, "broker.local");
        assert_eq!(runtime.network.mqtt_port, 1883);
        assert_eq!(runtime.owner_id, "555");
    }

    #[test]
    fn simulated_outputs_honour_polarity() {
        let mut outputs = SimulatedOutputs::new(OutputConfig::default());

        outputs.set_channel(Channel::IrrigationPump, true);
        outputs.set_channel(Channel::Ventilation, true);

        assert_eq!(outputs.level(Channel::IrrigationPump), Some(false));
        assert_eq!(outputs.level(Channel::Ventilation), Some(true));
        assert_eq!(outputs.level(Channel::LightLed), None);
    }

    #[tokio::test]
    async fn offline_link_reports_unavailable_endpoint() {
        let (client, _eventloop) =
            AsyncClient::new(MqttOptions::new("growbox-test", "localhost", 1883), 10);
        let link = MqttLink {
            client,
            connected: Arc::new(AtomicBool::new(false)),
        };
        let message = OutboundMessage::text("424242", "Irrigation recorded.");

        assert!(matches!(
            link.send(&message),
            Err(ControlError::EndpointUnavailable)
        ));

        link.connected.store(true, Ordering::Relaxed);
        assert!(link.send(&message).is_ok());
    }

    #[tokio::test]
    async fn panicking_control_loop_stops_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_task = tokio::task::spawn_blocking(|| panic!("output driver fault"));

        let err = serve_until_control_exits(listener, Router::new(), control_task)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "control loop panicked");
    }

    #[tokio::test]
    async fn returning_control_loop_stops_the_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let control_task = tokio::task::spawn_blocking(|| ());

        let err = serve_until_control_exits(listener, Router::new(), control_task)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "control loop exited");
    }

    #[tokio::test]
    async fn missing_runtime_file_yields_defaults() {
        let dir = scratch_dir("runtime");

        let runtime = read_runtime_config(&dir.join("runtime.json")).await.unwrap();

        assert_eq!(runtime.poll_interval_ms, 200);
        assert_eq!(runtime.state_publish_interval_ms, 10_000);
    }
}
