#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use core::net::Ipv4Addr;

use defmt::info;
use dht_mqtt::esp::{EmbassyTiming, FlexPin};
use dht_mqtt::{publish_free_heap, publish_reading, ChannelSink, Config, Dht, Message, ReadThrottle, Topics};
use embassy_executor::Spawner;
use embassy_net::{tcp::TcpSocket, DhcpConfig, Runner, Stack, StackResources};
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, channel::Channel};
use embassy_time::{Delay, Duration, Instant, Ticker, Timer};
use embedded_io_async::{Read, Write};
use esp_hal::{
    clock::CpuClock,
    gpio::{AnyPin, Flex, Pin},
    timer::{systimer::SystemTimer, timg::TimerGroup},
};
use esp_wifi::{
    wifi::{ClientConfiguration, Configuration, WifiController, WifiDevice, WifiEvent},
    EspWifiController,
};
use tinymqtt::MqttClient;
use {esp_backtrace as _, esp_println as _};

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

const SSID: &str = env!("SSID");
const PASSWORD: &str = env!("PASSWORD");
const HOSTNAME: &str = env!("HOSTNAME");
const MQTT_CLIENT_ID: &str = env!("MQTT_CLIENT_ID");
const MQTT_BROKER: &str = env!("MQTT_BROKER");
const MQTT_PORT: &str = env!("MQTT_PORT");

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

const HEAP_REPORT_INTERVAL: Duration = Duration::from_secs(60);

type TelemetryChannel = Channel<NoopRawMutex, Message, 4>;

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 64 * 1024);

    let timer0 = SystemTimer::new(peripherals.SYSTIMER);
    esp_hal_embassy::init(timer0.alarm0);

    info!("Embassy initialized!");

    let mut rng = esp_hal::rng::Rng::new(peripherals.RNG);
    let timer1 = TimerGroup::new(peripherals.TIMG0);
    let wifi_init = &*mk_static!(
        EspWifiController<'static>,
        esp_wifi::init(timer1.timer0, rng, peripherals.RADIO_CLK)
            .expect("Failed to initialize WIFI controller")
    );
    let (wifi_controller, wifi_interfaces) = esp_wifi::wifi::new(wifi_init, peripherals.WIFI)
        .expect("Failed to initialize WIFI controller");

    let wifi_device: WifiDevice<'_> = wifi_interfaces.sta;
    let mut dhcp_config = DhcpConfig::default();
    dhcp_config.hostname =
        Some(heapless::String::try_from(HOSTNAME).expect("Hostname is too long"));
    let net_config = embassy_net::Config::dhcpv4(dhcp_config);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (sta_stack, sta_runner) = embassy_net::new(
        wifi_device,
        net_config,
        mk_static!(StackResources<4>, StackResources::<4>::new()),
        seed,
    );

    let telemetry = &*mk_static!(TelemetryChannel, Channel::new());

    spawner.spawn(connection(wifi_controller)).ok();
    spawner.spawn(net_task(sta_runner)).ok();

    while !sta_stack.is_link_up() {
        info!("=> Connecting...");
        Timer::after(Duration::from_millis(500)).await;
    }

    let dht_pin = peripherals.GPIO10.degrade();
    spawner.spawn(dht_task(dht_pin, telemetry)).ok();
    spawner.spawn(heap_task(telemetry)).ok();
    spawner.spawn(mqtt_task(sta_stack, telemetry)).ok();
}

#[embassy_executor::task]
async fn connection(mut controller: WifiController<'static>) {
    info!("Wifi starting...");
    loop {
        let client_config = Configuration::Client(ClientConfiguration {
            ssid: SSID.into(),
            password: PASSWORD.into(),
            auth_method: esp_wifi::wifi::AuthMethod::WPAWPA2Personal,
            ..Default::default()
        });
        match controller.set_configuration(&client_config) {
            Ok(_) => info!("Set_configuration successful"),
            Err(e) => info!("Set_configuration unsuccessful: {:?}", e),
        };
        match controller.start_async().await {
            Ok(_) => info!("Start_wifi successful"),
            Err(e) => info!("Start_wifi unsuccessful: {:?}", e),
        }

        match controller.connect_async().await {
            Ok(_) => {
                info!("Connection successful");
                controller.wait_for_event(WifiEvent::StaDisconnected).await;
                info!("Disconnected...");
            }
            Err(e) => {
                info!("Connection unsuccessful: {:?}", e);
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await;
}

#[embassy_executor::task]
async fn dht_task(pin: AnyPin<'static>, telemetry: &'static TelemetryChannel) {
    let mut dht = Dht::with_config(
        FlexPin::new(Flex::new(pin)),
        EmbassyTiming,
        Config::default().with_disable_interrupts(true),
    );
    let mut throttle = ReadThrottle::default();
    let mut sink = ChannelSink::new(telemetry.sender());
    let topics = Topics::default();

    loop {
        let now = Instant::now().as_millis();
        if throttle.poll(now) {
            let reading = dht.read_async(&mut Delay).await;
            info!(
                "Reading: status {} humidity {} temperature {}",
                reading.status.code(),
                reading.humidity,
                reading.temperature
            );
            if let Err(e) = publish_reading(&mut sink, &topics, &reading) {
                info!("Telemetry error: {:?}", defmt::Debug2Format(&e));
            }
        }
        Timer::after(Duration::from_millis(throttle.remaining(Instant::now().as_millis()))).await;
    }
}

#[embassy_executor::task]
async fn heap_task(telemetry: &'static TelemetryChannel) {
    let mut ticker = Ticker::every(HEAP_REPORT_INTERVAL);
    let mut sink = ChannelSink::new(telemetry.sender());
    let topics = Topics::default();

    loop {
        ticker.next().await;
        let free = esp_alloc::HEAP.free();
        info!("Free heap: {} bytes", free);
        if let Err(e) = publish_free_heap(&mut sink, &topics, free) {
            info!("Telemetry error: {:?}", defmt::Debug2Format(&e));
        }
    }
}

#[embassy_executor::task]
async fn mqtt_task(stack: Stack<'static>, telemetry: &'static TelemetryChannel) {
    let mut rx_buffer = [0u8; 1024];
    let mut tx_buffer = [0u8; 1024];
    let mut socket = TcpSocket::new(stack, &mut rx_buffer, &mut tx_buffer);
    let remote_endpoint = (
        MQTT_BROKER
            .parse::<Ipv4Addr>()
            .expect("MQTT_BROKER is not valid"),
        MQTT_PORT.parse::<u16>().expect("MQTT_PORT is not valid"),
    );
    while socket.connect(remote_endpoint).await.is_err() {
        info!("Failed to connect to MQTT broker, retrying...");
        Timer::after(Duration::from_secs(1)).await;
    }
    socket.set_keep_alive(Some(Duration::from_secs(5)));

    let mut mqtt_client: MqttClient<1024> = MqttClient::new();
    while !mqtt_client.is_connected() {
        let connect = match mqtt_client.connect(MQTT_CLIENT_ID, None) {
            Ok(packet) => packet,
            Err(e) => {
                info!("MQTT connect packet error: {:?}", defmt::Debug2Format(&e));
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };
        if let Err(e) = socket.write_all(connect).await {
            info!("Err: {:?}", e);
            Timer::after(Duration::from_secs(1)).await;
            continue;
        }
        socket.flush().await.ok();

        let mut response_buf = [0u8; 64];
        match socket.read(&mut response_buf).await {
            Ok(size) => {
                info!("Read {} bytes from socket", size);
                if let Err(e) = mqtt_client.receive_packet(&response_buf[..size], |_client, _topic, _payload: &[u8]| {}) {
                    info!("Failed to connect MQTT client: {:?}", defmt::Debug2Format(&e));
                }
            }
            Err(e) => info!("Failed to read from socket: {:?}", e),
        }
    }
    info!("MQTT client connected");

    loop {
        let message = telemetry.receive().await;
        match mqtt_client.publish(&message.topic, message.body.as_bytes()) {
            Ok(packet) => match socket.write_all(packet).await {
                Ok(_) => {
                    socket.flush().await.ok();
                    info!("Published to {}", message.topic.as_str());
                }
                Err(e) => info!("Err: {:?}", e),
            },
            Err(e) => info!("Publishing error: {:?}", defmt::Debug2Format(&e)),
        }
    }
}
