use num_cpus;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::error;
use std::fs::File;
use std::io::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    port: u16,
    local: bool,
    asset_root: String,
    www_root: String,
    cert_file: String,
    key_file: String,
    passwords_file: String,
    worker_threads: usize,
    #[serde(default = "default_not_found_message")]
    not_found_message: String,
}

fn default_not_found_message() -> String {
    "Resource could not be found".to_string()
}

impl Config {
    pub fn new() -> Self {
        Self {
            port: 8443,
            local: true,
            asset_root: "assets".to_string(),
            www_root: "www".to_string(),
            cert_file: "config/cert.pem".to_string(),
            key_file: "config/key.pem".to_string(),
            passwords_file: "config/passwords.csv".to_string(),
            worker_threads: 0,
            not_found_message: default_not_found_message(),
        }
    }

    pub fn from_toml(filename: &str) -> Self {
        let mut file = match File::open(filename) {
            Ok(f) => f,
            Err(e) => panic!("no such file {} exception:{}", filename, e),
        };
        let mut str_val = String::new();
        match file.read_to_string(&mut str_val) {
            Ok(s) => s,
            Err(e) => panic!("Error Reading file: {}", e),
        };

        let mut raw_config: Config = match toml::from_str(&str_val) {
            Ok(t) => t,
            Err(_) => {
                error!("无法成功从配置文件构建配置对象，使用默认配置");
                Config::new()
            }
        };
        if raw_config.worker_threads == 0 {
            raw_config.worker_threads = num_cpus::get();
        }
        raw_config
    }
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn asset_root(&self) -> &str {
        &self.asset_root
    }

    pub fn www_root(&self) -> &str {
        &self.www_root
    }

    pub fn cert_file(&self) -> &str {
        &self.cert_file
    }

    pub fn key_file(&self) -> &str {
        &self.key_file
    }

    pub fn passwords_file(&self) -> &str {
        &self.passwords_file
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn not_found_message(&self) -> &str {
        &self.not_found_message
    }
}
