/// Boot configuration keys forwarded to the crate as `PC_TABLE_<KEY>`.
const CONFIG_KEYS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "HOSTNAME",
    "MQTT_BROKER_HOST",
    "MQTT_BROKER_PORT",
    "MQTT_RECONNECT_MS",
    "MQTT_KEEP_ALIVE_S",
    "LIVENESS_INTERVAL_MS",
    "MEASUREMENT_INTERVAL_MS",
    "TEMP_CORRECTION",
];

fn main() {
    // Load .env file for node configuration
    load_env_config();

    if std::env::var_os("CARGO_FEATURE_FIRMWARE").is_some() {
        linker_be_nice();
        // make sure linkall.x is the last linker script (otherwise might cause problems with flip-link)
        println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
    }
}

/// Load environment configuration from .env file
/// Environment variables take priority over .env file values
fn load_env_config() {
    use std::env;
    use std::path::Path;

    // Tell cargo to rerun this build script if .env file changes
    println!("cargo:rerun-if-changed=.env");

    for key in CONFIG_KEYS {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    // Try to load .env file if it exists
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => println!("cargo:warning=Loaded .env file"),
            Err(e) => println!("cargo:warning=Failed to load .env file: {}", e),
        }
    }

    // Unset keys are forwarded as empty strings, the crate keeps its default for those
    for key in CONFIG_KEYS {
        let value = env::var(key)
            .unwrap_or_else(|_| String::new())
            .trim()
            .to_string();
        println!("cargo:rustc-env=PC_TABLE_{}={}", key, value);
    }

    match env::var("WIFI_SSID").map(|s| s.trim().to_string()) {
        Ok(ssid) if !ssid.is_empty() => println!("cargo:warning=WIFI_SSID configured: {}", ssid),
        _ => println!("cargo:warning=WIFI_SSID is empty - WiFi will not be configured"),
    }

    match env::var("WIFI_PASSWORD").map(|s| s.trim().len()) {
        Ok(len) if len > 0 => {
            println!("cargo:warning=WIFI_PASSWORD configured (length: {})", len)
        }
        _ => println!("cargo:warning=WIFI_PASSWORD is empty - WiFi will not be configured"),
    }
}

fn linker_be_nice() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        let kind = &args[1];
        let what = &args[2];

        match kind.as_str() {
            "undefined-symbol" => match what.as_str() {
                "_stack_start" => {
                    eprintln!();
                    eprintln!("💡 Is the linker script `linkall.x` missing?");
                    eprintln!();
                }
                "esp_wifi_preempt_enable"
                | "esp_wifi_preempt_yield_task"
                | "esp_wifi_preempt_task_create" => {
                    eprintln!();
                    eprintln!("💡 `esp-wifi` has no scheduler enabled. Make sure you have the `builtin-scheduler` feature enabled, or that you provide an external scheduler.");
                    eprintln!();
                }
                _ => (),
            },
            // we don't have anything helpful for "missing-lib" yet
            _ => {
                std::process::exit(1);
            }
        }

        std::process::exit(0);
    }

    println!(
        "cargo:rustc-link-arg-bins=--error-handling-script={}",
        std::env::current_exe().unwrap().display()
    );
}
