#![no_std]
#![no_main]

use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{DriveMode, Flex, Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info};

extern crate alloc;

// WiFi imports
use esp_wifi::wifi;

// Embassy-net imports
use embassy_net::tcp::TcpSocket;
use embassy_net::{Config, DhcpConfig, Stack, StackResources};
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker};
use esp_hal_embassy::Executor;
use static_cell::StaticCell;

// Import our library modules
use pc_table::config::{self, NodeConfig};
use pc_table::dht::{Dht11, SensorError};
use pc_table::encoder::RotaryEncoder;
use pc_table::node::Node;
use pc_table::publisher::{Reading, SensorSource};
use pc_table::mqtt::PACKET_BUFFER_SIZE;
use pc_table::transport::{BrokerSocket, TcpBusTransport};
use pc_table::wifi::WiFiManager;

// Add app descriptor for espflash compatibility
esp_bootloader_esp_idf::esp_app_desc!();

/// Node loop period
const NODE_TICK: Duration = Duration::from_millis(10);

/// TCP socket buffers of the broker connection
const SOCKET_BUFFER_SIZE: usize = 1024;

/// DHT11 that reads with interrupts masked, the bit timing does not survive preemption
struct GuardedSensor(Dht11<Flex<'static>, Delay>);

impl SensorSource for GuardedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        critical_section::with(|_| self.0.read())
    }
}

type Encoder = RotaryEncoder<Input<'static>, Input<'static>, Input<'static>>;
type PcTableNode =
    Node<WiFiManager<'static>, TcpBusTransport<'static>, GuardedSensor, Encoder>;

// Static cells for embassy components
static WIFI_INIT_CELL: StaticCell<esp_wifi::EspWifiController<'static>> = StaticCell::new();
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static CONFIG_CELL: StaticCell<NodeConfig> = StaticCell::new();
static SOCKET_RX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static SOCKET_TX: StaticCell<[u8; SOCKET_BUFFER_SIZE]> = StaticCell::new();
static BROKER_SOCKET: StaticCell<BrokerSocket<'static>> = StaticCell::new();
static MQTT_SEND: StaticCell<[u8; PACKET_BUFFER_SIZE]> = StaticCell::new();
static MQTT_RECV: StaticCell<[u8; PACKET_BUFFER_SIZE]> = StaticCell::new();
static NODE_CELL: StaticCell<PcTableNode> = StaticCell::new();

// Static executor for embassy tasks
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    error!("[MAIN] {}", info);
    loop {}
}

/// Nothing sensible can run without a valid configuration
fn halt() -> ! {
    error!("[MAIN] Halted");
    loop {}
}

// Embassy task to run the network stack
#[embassy_executor::task]
async fn net_task(
    mut runner: embassy_net::Runner<'static, esp_wifi::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

/// Node loop task, one pass per tick
#[embassy_executor::task]
async fn node_task(node: &'static mut PcTableNode) -> ! {
    info!("[MAIN] Node loop running every {} ms", NODE_TICK.as_millis());

    let mut ticker = Ticker::every(NODE_TICK);
    loop {
        node.run_once(Instant::now()).await;
        ticker.next().await;
    }
}

fn print_config(config: &NodeConfig) {
    info!("[MAIN] WiFi");
    info!("[MAIN] | > SSID: '{}'", config.link.ssid.as_str());
    info!("[MAIN] | > PASSWORD: {} characters", config.link.password.len());
    info!("[MAIN] | > HOSTNAME: '{}'", config.hostname.as_str());
    info!("[MAIN] MQTT");
    info!(
        "[MAIN] | > ADDR: 'mqtt://{}:{}'",
        config.broker_host.as_str(),
        config.broker_port
    );
    info!(
        "[MAIN] | > INTERVALS: reconnect {} ms, liveness {} ms, measurement {} ms",
        config.reconnect_interval.as_millis(),
        config.liveness_interval.as_millis(),
        config.measurement_interval.as_millis()
    );
    info!("[MAIN] | > TEMP_CORRECTION: {:.1}", config.temperature_offset);
}

#[esp_hal::main]
fn main() -> ! {
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    // Initialize heap allocator for WiFi (72KB)
    esp_alloc::heap_allocator!(size: 72 * 1024);

    esp_println::logger::init_logger(log::LevelFilter::Info);

    info!("#####################################");
    info!("#    PC-TABLE - SMARTSHOP MODULE    #");
    info!("#####################################");
    info!("> Version {}", pc_table::VERSION);

    let config = match NodeConfig::from_build_env() {
        Ok(config) => CONFIG_CELL.init(config),
        Err(e) => {
            error!("[MAIN] Invalid configuration: {}", e);
            halt();
        }
    };
    print_config(config);

    // Initialize embassy time system
    let timer_group0 = TimerGroup::new(peripherals.TIMG0);
    esp_hal_embassy::init(timer_group0.timer0);

    info!("[MAIN] Initializing devices ... ");

    // DHT11 data line, open drain with pull-up
    let mut dht_pin = Flex::new(peripherals.GPIO26);
    dht_pin.apply_output_config(
        &OutputConfig::default()
            .with_drive_mode(DriveMode::OpenDrain)
            .with_pull(Pull::Up),
    );
    dht_pin.set_input_enable(true);
    dht_pin.set_output_enable(true);
    dht_pin.set_high();
    let sensor = GuardedSensor(Dht11::new(dht_pin, Delay::new()));
    info!("[MAIN] | > DHT11 on GPIO{}", config::pins::DHT_SENSOR);

    // Buzzer stays silent, held low for the lifetime of the firmware
    let _buzzer = Output::new(peripherals.GPIO25, Level::Low, OutputConfig::default());

    let input_config = InputConfig::default().with_pull(Pull::Up);
    let upper = RotaryEncoder::new(
        Input::new(peripherals.GPIO23, input_config),
        Input::new(peripherals.GPIO19, input_config),
        Input::new(peripherals.GPIO18, input_config),
    );
    let lower = RotaryEncoder::new(
        Input::new(peripherals.GPIO16, input_config),
        Input::new(peripherals.GPIO27, input_config),
        Input::new(peripherals.GPIO14, input_config),
    );
    info!(
        "[MAIN] | > Encoders on GPIO{:?} and GPIO{:?}",
        config::pins::UPPER_ENCODER,
        config::pins::LOWER_ENCODER
    );
    info!("[MAIN] Initializing devices ... done!");

    // Initialize WiFi driver
    let timer_group1 = TimerGroup::new(peripherals.TIMG1);
    let mut rng = Rng::new(peripherals.RNG);
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let wifi_init = match esp_wifi::init(timer_group1.timer0, rng, peripherals.RADIO_CLK) {
        Ok(wifi_init) => WIFI_INIT_CELL.init(wifi_init),
        Err(e) => {
            error!("[WIFI] Driver init failed: {:?}", e);
            halt();
        }
    };

    let (wifi_controller, wifi_interfaces) = match wifi::new(wifi_init, peripherals.WIFI) {
        Ok(parts) => parts,
        Err(e) => {
            error!("[WIFI] Controller init failed: {:?}", e);
            halt();
        }
    };
    info!("[WIFI] WiFi driver initialized successfully");

    // Create embassy-net stack, DHCP announces the node hostname
    let mut dhcp_config = DhcpConfig::default();
    dhcp_config.hostname = Some(config.hostname.clone());
    let stack_resources = STACK_RESOURCES.init(StackResources::new());
    let (stack, runner): (Stack<'static>, _) = embassy_net::new(
        wifi_interfaces.sta,
        Config::dhcpv4(dhcp_config),
        stack_resources,
        seed,
    );
    info!("[WIFI] Embassy-net stack created with DHCP configuration");

    let wifi_manager = WiFiManager::new(wifi_controller, stack, config.reconnect_interval);
    let mut wifi_manager = match wifi_manager {
        Ok(manager) => manager,
        Err(e) => {
            error!("[WIFI] {}", e);
            halt();
        }
    };
    if let Err(e) = wifi_manager.start(&config.link) {
        error!("[WIFI] Failed to start station: {:?}", e);
        halt();
    }

    let socket = TcpSocket::new(
        stack,
        SOCKET_RX.init([0; SOCKET_BUFFER_SIZE]),
        SOCKET_TX.init([0; SOCKET_BUFFER_SIZE]),
    );
    let transport = TcpBusTransport::new(
        stack,
        BROKER_SOCKET.init(Mutex::new(socket)),
        MQTT_SEND.init([0; PACKET_BUFFER_SIZE]),
        MQTT_RECV.init([0; PACKET_BUFFER_SIZE]),
        config,
    );

    let node = match Node::new(
        config,
        wifi_manager,
        transport,
        sensor,
        [upper, lower],
        Instant::now(),
    ) {
        Ok(node) => NODE_CELL.init(node),
        Err(e) => {
            error!("[MAIN] Invalid configuration: {}", e);
            halt();
        }
    };
    info!("[MAIN] Setup done!");

    // Initialize embassy executor and run tasks
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        info!("[MAIN] Spawning network task...");
        spawner.spawn(net_task(runner)).ok();

        info!("[MAIN] Spawning node task...");
        if let Err(e) = spawner.spawn(node_task(node)) {
            error!("[MAIN] Failed to spawn node task: {:?}", e);
        }
    });
}
