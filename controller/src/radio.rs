//! Advertisement sources feeding the ingestion entry point.

use std::time::Duration;

use anyhow::bail;
use brewery_common::rapt::{self, PillFrame};
use tracing::info;

const SIMULATED_ADDRESS: &str = "78:E3:6D:00:00:01";
const SIMULATED_PERIOD: Duration = Duration::from_secs(3);

/// One observed advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioEvent {
    pub address: String,
    pub rssi: i16,
    pub payload: Vec<u8>,
}

/// Receiver of advertisements. Must return quickly and never block.
pub trait AdvertisementSink {
    fn on_advertisement(&self, event: &RadioEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioSource {
    Simulated,
    #[cfg(feature = "bluetooth")]
    Bluez,
}

impl RadioSource {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simulated" | "sim" => Ok(Self::Simulated),
            #[cfg(feature = "bluetooth")]
            "bluez" | "bluetooth" => Ok(Self::Bluez),
            other => bail!("unsupported radio source '{other}'"),
        }
    }
}

pub fn spawn_source<S>(source: RadioSource, sink: S)
where
    S: AdvertisementSink + Send + Sync + 'static,
{
    match source {
        RadioSource::Simulated => spawn_simulated_pill(sink),
        #[cfg(feature = "bluetooth")]
        RadioSource::Bluez => {
            tokio::spawn(async move {
                if let Err(err) = bluez::scan(sink).await {
                    tracing::error!("bluetooth scan stopped: {err}");
                }
            });
        }
    }
}

fn spawn_simulated_pill<S>(sink: S)
where
    S: AdvertisementSink + Send + Sync + 'static,
{
    info!("simulated RAPT pill broadcasting every {SIMULATED_PERIOD:?}");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SIMULATED_PERIOD);
        let mut tick: u64 = 0;

        loop {
            interval.tick().await;
            sink.on_advertisement(&simulated_event(tick));
            tick = tick.saturating_add(1);
        }
    });
}

fn simulated_event(tick: u64) -> RadioEvent {
    RadioEvent {
        address: SIMULATED_ADDRESS.to_string(),
        rssi: -58 - (tick % 12) as i16,
        payload: rapt::encode_advertisement(&simulated_frame(tick)),
    }
}

/// Slow temperature swing around 20 °C while gravity falls as if fermenting.
fn simulated_frame(tick: u64) -> PillFrame {
    let celsius = 20.0 + (tick as f64 * 0.05).sin() * 2.5;
    let gravity_drop = (tick / 20).min(40) as u16;

    PillFrame {
        version: 2,
        compat: 0.0,
        temperature_raw: rapt::temperature_raw_from_celsius(celsius),
        x_raw: 16,
        y_raw: -8,
        z_raw: 1_000,
        gravity_raw: 1_050 - gravity_drop,
        battery_raw: 90 * 256,
    }
}

#[cfg(feature = "bluetooth")]
mod bluez {
    use bluer::{AdapterEvent, Address};
    use futures::{pin_mut, StreamExt};
    use tracing::info;

    use super::{AdvertisementSink, RadioEvent};

    pub async fn scan<S: AdvertisementSink>(sink: S) -> bluer::Result<()> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!("bluetooth scan started on {}", adapter.name());

        let events = adapter.discover_devices_with_changes().await?;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            forward_device(&adapter, address, &sink).await?;
        }

        Ok(())
    }

    async fn forward_device<S: AdvertisementSink>(
        adapter: &bluer::Adapter,
        address: Address,
        sink: &S,
    ) -> bluer::Result<()> {
        let device = adapter.device(address)?;
        let Some(manufacturer_data) = device.manufacturer_data().await? else {
            return Ok(());
        };
        let rssi = device.rssi().await?.unwrap_or_default();

        for (company_id, data) in manufacturer_data {
            sink.on_advertisement(&RadioEvent {
                address: address.to_string(),
                rssi,
                payload: rebuild_advertisement(company_id, &data),
            });
        }
        Ok(())
    }

    /// BlueZ strips the AD framing; put back the flags structure and the
    /// manufacturer header so offsets match the raw broadcast.
    pub(super) fn rebuild_advertisement(company_id: u16, data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(7 + data.len());
        payload.extend_from_slice(&[0x02, 0x01, 0x06]);
        payload.push(u8::try_from(3 + data.len()).unwrap_or(u8::MAX));
        payload.push(0xFF);
        payload.extend_from_slice(&company_id.to_le_bytes());
        payload.extend_from_slice(data);
        payload
    }
}
