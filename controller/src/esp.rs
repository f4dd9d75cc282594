use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::Method,
    io::Write,
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyOutputPin, Level, Output, PinDriver};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use serde::Serialize;

use growbox_common::{
    config::NetworkConfig, execute_actions, ByteStore, Channel, ChannelPin, ControlError,
    Controller, ControllerStatus, InboundMessage, OutboundMessage, OutputConfig, OutputDriver, RuntimeConfig,
    StoreError, TOPIC_CHAT_INBOUND, TOPIC_CHAT_OUTBOUND, TOPIC_CONTROLLER_STATE,
    TOPIC_CONTROLLER_STATUS,
};

const NVS_NAMESPACE: &str = "growbox";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WATCHDOG_FEED_CHUNK_MS: u64 = 1_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const INBOUND_QUEUE_DEPTH: usize = 16;

type SharedMqtt = Arc<Mutex<EspMqttClient<'static>>>;
type SharedStatus = Arc<Mutex<ControllerStatus>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_build_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, mqtt=`{}:{}`, light={}/{}",
        runtime.network.wifi_ssid,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
        runtime.light.model.as_str(),
        runtime.light.profile.as_str(),
    );

    let mut outputs = GpioOutputs::new(&runtime.outputs)?;

    let settings = NvsByteStore::new(nvs_partition.clone())?;
    let mut controller = Controller::boot(
        runtime.light,
        runtime.owner_id.clone(),
        settings,
        monotonic_ms(),
    )
    .context("settings store unavailable at boot")?;
    let owner_id = controller.owner_id().to_string();

    // Outputs go to their boot pattern before any network work.
    execute_actions(controller.startup_actions(), &mut outputs, &owner_id);

    let Peripherals { modem, .. } = Peripherals::take()?;
    let mut wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let mqtt_connected = Arc::new(AtomicBool::new(false));
    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network)?;
    let mqtt_client: SharedMqtt = Arc::new(Mutex::new(mqtt_client));
    let (inbound_tx, inbound_rx) = mpsc::sync_channel(INBOUND_QUEUE_DEPTH);
    spawn_mqtt_receiver(
        mqtt_conn,
        mqtt_client.clone(),
        mqtt_connected.clone(),
        inbound_tx,
    )?;

    let status: SharedStatus = Arc::new(Mutex::new(controller.status()));
    let _server = create_http_server(status.clone())?;

    let poll_interval = Duration::from_millis(runtime.poll_interval_ms);
    let mut was_connected = false;
    let mut last_state_publish_ms: Option<u64> = None;
    let mut last_wifi_retry_ms = 0_u64;

    loop {
        feed_watchdog();
        let now_ms = monotonic_ms();

        if !is_wifi_station_connected()
            && now_ms.saturating_sub(last_wifi_retry_ms) >= WIFI_RETRY_DELAY_MS
        {
            last_wifi_retry_ms = now_ms;
            if let Err(err) = wifi.wifi_mut().connect() {
                debug!("wifi reconnect request failed: {err}");
            }
        }

        let connected = mqtt_connected.load(Ordering::Relaxed);
        if connected && !was_connected {
            let greeting = controller.endpoint_connected();
            let outbound = execute_actions(greeting, &mut outputs, &owner_id);
            send_all(&mqtt_client, connected, outbound);
        } else if !connected && was_connected {
            warn!("messaging endpoint unavailable; skipping inbound commands");
        }
        was_connected = connected;

        if connected {
            while let Ok(message) = inbound_rx.try_recv() {
                let actions = controller.handle_message(&message.sender, &message.text);
                let outbound = execute_actions(actions, &mut outputs, &owner_id);
                send_all(&mqtt_client, connected, outbound);
            }
        }

        let actions = controller.poll(monotonic_ms());
        let outbound = execute_actions(actions, &mut outputs, &owner_id);
        send_all(&mqtt_client, connected, outbound);

        let snapshot = controller.status();
        let publish_due = last_state_publish_ms.map_or(true, |at| {
            now_ms.saturating_sub(at) >= runtime.state_publish_interval_ms
        });
        if connected && publish_due {
            last_state_publish_ms = Some(now_ms);
            if let Err(err) =
                publish_json(&mqtt_client, TOPIC_CONTROLLER_STATE, true, &snapshot)
            {
                warn!("state publish failed: {err:#}");
            }
        }
        match status.lock() {
            Ok(mut shared) => *shared = snapshot,
            Err(_) => warn!("status snapshot lock poisoned"),
        }

        thread::sleep(poll_interval);
    }
}

fn ensure_build_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }

    if runtime.owner_id.is_empty() {
        if let Some(owner) = option_env!("GROWBOX_OWNER_ID") {
            runtime.owner_id = owner.to_string();
        }
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 4096];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}

/// Settings slots backed by NVS `u8` entries. `set_u8` commits before it
/// returns.
struct NvsByteStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsByteStore {
    fn new(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .context("failed to open settings namespace")?;
        Ok(Self { nvs })
    }
}

impl ByteStore for NvsByteStore {
    fn read_u8(&self, key: &str) -> Result<Option<u8>, StoreError> {
        self.nvs
            .get_u8(key)
            .map_err(|err| StoreError::Backend(format!("nvs read `{key}`: {err}")))
    }

    fn write_u8(&mut self, key: &str, value: u8) -> Result<(), StoreError> {
        self.nvs.set_u8(key, value).map_err(|err| {
            warn!("nvs write `{key}` failed: {err}");
            StoreError::Backend(format!("nvs write `{key}`: {err}"))
        })?;
        info!("settings slot `{key}` = {value}");
        Ok(())
    }
}

struct OutputPin {
    channel: Channel,
    wiring: ChannelPin,
    driver: PinDriver<'static, AnyOutputPin, Output>,
}

struct GpioOutputs {
    pins: Vec<OutputPin>,
}

impl GpioOutputs {
    fn new(config: &OutputConfig) -> anyhow::Result<Self> {
        let mut pins = Vec::with_capacity(Channel::ALL.len());

        for channel in Channel::ALL {
            let wiring = config.pin(channel);
            let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(wiring.gpio)) }
                .with_context(|| {
                    format!("failed to claim GPIO{} for {}", wiring.gpio, channel.as_str())
                })?;
            driver.set_level(Level::from(wiring.level(false)))?;
            pins.push(OutputPin {
                channel,
                wiring,
                driver,
            });
        }

        Ok(Self { pins })
    }
}

impl OutputDriver for GpioOutputs {
    fn set_channel(&mut self, channel: Channel, on: bool) {
        let Some(pin) = self.pins.iter_mut().find(|pin| pin.channel == channel) else {
            return;
        };

        let high = pin.wiring.level(on);
        match pin.driver.set_level(Level::from(high)) {
            Ok(()) => info!(
                "{} {} (GPIO{} {})",
                channel.as_str(),
                if on { "on" } else { "off" },
                pin.wiring.gpio,
                if high { "high" } else { "low" }
            ),
            Err(err) => warn!("failed to drive {}: {err}", channel.as_str()),
        }
    }

    /// Holds the loop in watchdog-sized chunks.
    fn block_for(&mut self, duration_ms: u64) {
        info!("blocking control loop for {duration_ms} ms");
        let mut remaining = duration_ms;
        while remaining > 0 {
            let chunk = remaining.min(WATCHDOG_FEED_CHUNK_MS);
            thread::sleep(Duration::from_millis(chunk));
            feed_watchdog();
            remaining -= chunk;
        }
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(wifi);
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    // The grow cycle keeps running offline; the loop retries the link.
    warn!("wifi unavailable after {WIFI_CONNECT_ATTEMPTS} attempts; continuing offline");
    Ok(wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("growbox-controller"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        lwt: Some(esp_idf_svc::mqtt::client::LwtConfiguration {
            topic: TOPIC_CONTROLLER_STATUS,
            payload: b"offline",
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn on_mqtt_connected(mqtt: &SharedMqtt) -> anyhow::Result<()> {
    let mut client = mqtt
        .lock()
        .map_err(|_| anyhow!("mqtt client lock poisoned"))?;
    client.subscribe(TOPIC_CHAT_INBOUND, QoS::AtLeastOnce)?;
    client.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, b"online")?;
    Ok(())
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    mqtt: SharedMqtt,
    connected: Arc<AtomicBool>,
    inbound: mpsc::SyncSender<InboundMessage>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        if let Err(err) = on_mqtt_connected(&mqtt) {
                            warn!("mqtt subscribe failed: {err:#}");
                        }
                        connected.store(true, Ordering::Relaxed);
                    }
                    EventPayload::Disconnected => {
                        if connected.swap(false, Ordering::Relaxed) {
                            warn!("mqtt disconnected");
                        }
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // Only complete payloads are processed.
                        if topic != TOPIC_CHAT_INBOUND || !matches!(details, Details::Complete) {
                            continue;
                        }
                        match InboundMessage::decode(data) {
                            Ok(message) => {
                                if inbound.try_send(message).is_err() {
                                    warn!("inbound queue full, dropping chat message");
                                }
                            }
                            Err(err) => warn!("dropping inbound chat payload: {err}"),
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    connected.store(false, Ordering::Relaxed);
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;

    Ok(())
}

fn send_all(mqtt: &SharedMqtt, connected: bool, messages: Vec<OutboundMessage>) {
    for message in messages {
        if let Err(err) = send_chat(mqtt, connected, &message) {
            warn!(
                "{err}, dropping message to {}: {}",
                message.recipient, message.text
            );
        }
    }
}

/// Publish failures are logged here. Only a missing broker session is
/// reported back.
fn send_chat(
    mqtt: &SharedMqtt,
    connected: bool,
    message: &OutboundMessage,
) -> Result<(), ControlError> {
    if !connected {
        return Err(ControlError::EndpointUnavailable);
    }
    if let Err(err) = publish_json(mqtt, TOPIC_CHAT_OUTBOUND, false, message) {
        warn!("outbound chat publish failed: {err:#}");
    }
    Ok(())
}

fn publish_json<T: Serialize>(
    mqtt: &SharedMqtt,
    topic: &str,
    retain: bool,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    let mut client = mqtt
        .lock()
        .map_err(|_| anyhow!("mqtt client lock poisoned"))?;
    client.publish(topic, QoS::AtLeastOnce, retain, &body)?;
    Ok(())
}

fn create_http_server(status: SharedStatus) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 8 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;
    server.fn_handler::<anyhow::Error, _>("/api/status", Method::Get, move |req| {
        let snapshot = status
            .lock()
            .map_err(|_| anyhow!("status snapshot lock poisoned"))?
            .clone();
        let body = serde_json::to_vec(&snapshot)?;
        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "application/json; charset=utf-8")],
        )?
        .write_all(&body)?;
        Ok(())
    })?;

    Ok(server)
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
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
