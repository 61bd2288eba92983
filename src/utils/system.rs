//! Host metrics for status replies (Linux `/proc` and `/sys`)

use std::fmt;
use std::net::{IpAddr, UdpSocket};
use std::time::Duration;

const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemMetrics {
    pub ip: Option<IpAddr>,
    pub ram_usage_pct: Option<f64>,
    pub cpu_usage_pct: Option<f64>,
    pub cpu_temperature_c: Option<f64>,
}

impl SystemMetrics {
    /// Gather everything; each metric that cannot be read stays `None`
    pub async fn collect() -> Self {
        let first = read_cpu_times().await;
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        let second = read_cpu_times().await;
        let cpu_usage_pct = match (first, second) {
            (Some(a), Some(b)) => cpu_usage_between(a, b),
            _ => None,
        };

        let ram_usage_pct = tokio::fs::read_to_string("/proc/meminfo")
            .await
            .ok()
            .and_then(|text| ram_usage_from_meminfo(&text));

        Self {
            ip: local_ip(),
            ram_usage_pct,
            cpu_usage_pct,
            cpu_temperature_c: cpu_temperature().await,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("IP: {}", or_na(self.ip.map(|ip| ip.to_string()))),
            format!("RAM Usage: {}", or_na(self.ram_usage_pct.map(|v| format!("{v:.1}%")))),
            format!("CPU Usage: {}", or_na(self.cpu_usage_pct.map(|v| format!("{v:.1}%")))),
            format!("CPU Temp: {}", or_na(self.cpu_temperature_c.map(|v| format!("{v:.1}C")))),
        ]
    }
}

impl fmt::Display for SystemMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}

fn or_na(value: Option<String>) -> String {
    value.unwrap_or_else(|| "N/A".to_string())
}

/// Address of the interface that routes to the internet. Nothing is sent.
pub fn local_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

pub fn ram_usage_from_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| {
        text.lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|value| value.parse::<f64>().ok())
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

/// (busy, total) jiffies from the aggregate `cpu` line of `/proc/stat`
pub fn cpu_times_from_stat(text: &str) -> Option<(u64, u64)> {
    let line = text.lines().find(|line| line.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    let total: u64 = values.iter().sum();
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total.saturating_sub(idle), total))
}

pub fn cpu_usage_between(first: (u64, u64), second: (u64, u64)) -> Option<f64> {
    let busy = second.0.checked_sub(first.0)?;
    let total = second.1.checked_sub(first.1)?;
    if total == 0 {
        return None;
    }
    Some(busy as f64 / total as f64 * 100.0)
}

async fn read_cpu_times() -> Option<(u64, u64)> {
    let text = tokio::fs::read_to_string("/proc/stat").await.ok()?;
    cpu_times_from_stat(&text)
}

/// First `cpu-thermal` zone, otherwise the first readable zone
async fn cpu_temperature() -> Option<f64> {
    let mut entries = tokio::fs::read_dir("/sys/class/thermal").await.ok()?;
    let mut fallback = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let dir = entry.path();
        if !entry.file_name().to_string_lossy().starts_with("thermal_zone") {
            continue;
        }
        let Some(celsius) = tokio::fs::read_to_string(dir.join("temp"))
            .await
            .ok()
            .and_then(|t| t.trim().parse::<f64>().ok())
            .map(|milli| milli / 1000.0)
        else {
            continue;
        };
        let kind = tokio::fs::read_to_string(dir.join("type")).await.unwrap_or_default();
        if kind.trim() == "cpu-thermal" {
            return Some(celsius);
        }
        fallback.get_or_insert(celsius);
    }
    fallback
}
