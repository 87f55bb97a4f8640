//! HTTP control of the ESP32 camera board (status, clock, frame size).

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::CameraConfig;

/// XCLK range (MHz) the sensor is stable at.
pub const XCLK_MIN_MHZ: u32 = 20;
pub const XCLK_MAX_MHZ: u32 = 40;

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("camera address is not configured")]
    MissingAddress,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("camera returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("unexpected camera response: {0}")]
    InvalidResponse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Sensor frame sizes, in the board's `framesize` index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    R96x96,
    Qqvga,
    R128x128,
    Qcif,
    Hqvga,
    R240x240,
    Qvga,
    Cif,
    Hvga,
    Vga,
    Svga,
    Xga,
    #[default]
    Hd,
    Sxga,
    Uxga,
}

impl Resolution {
    pub const ALL: [Resolution; 15] = [
        Resolution::R96x96,
        Resolution::Qqvga,
        Resolution::R128x128,
        Resolution::Qcif,
        Resolution::Hqvga,
        Resolution::R240x240,
        Resolution::Qvga,
        Resolution::Cif,
        Resolution::Hvga,
        Resolution::Vga,
        Resolution::Svga,
        Resolution::Xga,
        Resolution::Hd,
        Resolution::Sxga,
        Resolution::Uxga,
    ];

    /// Value of the `framesize` control variable.
    pub fn framesize(self) -> u8 {
        match self {
            Resolution::R96x96 => 0,
            Resolution::Qqvga => 1,
            Resolution::R128x128 => 2,
            Resolution::Qcif => 3,
            Resolution::Hqvga => 4,
            Resolution::R240x240 => 5,
            Resolution::Qvga => 6,
            Resolution::Cif => 7,
            Resolution::Hvga => 8,
            Resolution::Vga => 9,
            Resolution::Svga => 10,
            Resolution::Xga => 11,
            Resolution::Hd => 12,
            Resolution::Sxga => 13,
            Resolution::Uxga => 14,
        }
    }

    pub fn from_framesize(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.framesize() == value)
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::R96x96 => "96x96",
            Resolution::Qqvga => "QQVGA(160x120)",
            Resolution::R128x128 => "128x128",
            Resolution::Qcif => "QCIF(176x144)",
            Resolution::Hqvga => "HQVGA(240x176)",
            Resolution::R240x240 => "240x240",
            Resolution::Qvga => "QVGA(320x240)",
            Resolution::Cif => "CIF(400x296)",
            Resolution::Hvga => "HVGA(480x320)",
            Resolution::Vga => "VGA(640x480)",
            Resolution::Svga => "SVGA(800x600)",
            Resolution::Xga => "XGA(1024x768)",
            Resolution::Hd => "HD(1280x720)",
            Resolution::Sxga => "SXGA(1280x1024)",
            Resolution::Uxga => "UXGA(1600x1200)",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = CameraError;

    /// Accepts a label ("HD(1280x720)"), its short name ("hd"), or the
    /// numeric framesize index.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(index) = s.parse::<u8>() {
            return Self::from_framesize(index)
                .ok_or_else(|| CameraError::InvalidArgument(format!("unknown framesize {}", index)));
        }
        Self::ALL
            .into_iter()
            .find(|r| {
                let label = r.label();
                let short = label.split('(').next().unwrap_or(label);
                label.eq_ignore_ascii_case(s) || short.eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| CameraError::InvalidArgument(format!("unknown resolution '{}'", s)))
    }
}

/// Client for the camera's built-in HTTP server.
#[derive(Debug, Clone)]
pub struct CameraControl {
    client: reqwest::Client,
    base_url: String,
}

impl CameraControl {
    /// `address` is a host, `host:port`, or a full `http://` URL.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, CameraError> {
        let address = address.trim().trim_end_matches('/');
        if address.is_empty() {
            return Err(CameraError::MissingAddress);
        }
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &CameraConfig) -> Result<Self, CameraError> {
        let address = config.address.as_deref().ok_or(CameraError::MissingAddress)?;
        Self::new(address, Duration::from_secs(config.timeout_secs.max(1)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when `/status` answers with 200.
    pub async fn check_status(&self) -> bool {
        match self.get("/status", &[]).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Camera at {} unreachable: {}", self.base_url, e);
                false
            }
        }
    }

    /// Current sensor settings as reported by `/status`.
    pub async fn configuration(&self) -> Result<Map<String, Value>, CameraError> {
        let response = self.get("/status", &[]).await?;
        match response.json::<Value>().await? {
            Value::Object(map) => Ok(map),
            other => Err(CameraError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Set the sensor clock in MHz.
    pub async fn set_xclk(&self, mhz: u32) -> Result<(), CameraError> {
        if !(XCLK_MIN_MHZ..=XCLK_MAX_MHZ).contains(&mhz) {
            return Err(CameraError::InvalidArgument(format!(
                "xclk must be between {} and {} MHz, got {}",
                XCLK_MIN_MHZ, XCLK_MAX_MHZ, mhz
            )));
        }
        self.get("/xclk", &[("xclk", mhz.to_string())]).await?;
        log::info!("Camera XCLK set to {} MHz", mhz);
        Ok(())
    }

    pub async fn set_resolution(&self, resolution: Resolution) -> Result<(), CameraError> {
        self.get(
            "/control",
            &[
                ("var", "framesize".to_string()),
                ("val", resolution.framesize().to_string()),
            ],
        )
        .await?;
        log::info!("Camera resolution set to {}", resolution);
        Ok(())
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::Response, CameraError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CameraError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }
}
