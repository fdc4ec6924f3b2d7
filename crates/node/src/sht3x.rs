//! SHT3x temperature/humidity driver over I2C.
//!
//! Single-shot, high repeatability, clock stretching disabled. Each 16-bit
//! word in the response is followed by a CRC-8 (poly 0x31, init 0xFF).

use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::Reading;

/// Single shot, high repeatability, no clock stretching.
const CMD_MEASURE_HIGH: [u8; 2] = [0x24, 0x00];

/// Datasheet max for high repeatability is 15.5 ms.
const MEASURE_WAIT: Duration = Duration::from_millis(16);

const CRC_POLY: u8 = 0x31;
const CRC_INIT: u8 = 0xFF;

/// The two addresses selectable with the ADDR pin.
const VALID_ADDRS: [u16; 2] = [0x44, 0x45];

// ── Point configuration ─────────────────────────────────────────────────────

/// One SHT3x on the bus and the sensor id it publishes as.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPoint {
    pub addr: u16,
    pub sensor_id: String,
}

// ── Decoding ────────────────────────────────────────────────────────────────

fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC_INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn raw_to_temp_c(raw: u16) -> f64 {
    -45.0 + 175.0 * f64::from(raw) / 65535.0
}

fn raw_to_rh(raw: u16) -> f64 {
    100.0 * f64::from(raw) / 65535.0
}

/// Check both CRCs and convert a 6-byte measurement into (°C, %RH).
fn decode(buf: &[u8; 6]) -> anyhow::Result<(f64, f64)> {
    for (name, word) in [("temperature", &buf[0..3]), ("humidity", &buf[3..6])] {
        let expected = crc8(&word[..2]);
        anyhow::ensure!(
            word[2] == expected,
            "{name} crc mismatch: got {:#04x}, expected {expected:#04x}",
            word[2]
        );
    }
    let t = u16::from_be_bytes([buf[0], buf[1]]);
    let h = u16::from_be_bytes([buf[3], buf[4]]);
    Ok((raw_to_temp_c(t), raw_to_rh(h).clamp(0.0, 100.0)))
}

// ── Driver ──────────────────────────────────────────────────────────────────

pub struct Sht3x {
    i2c: I2c,
    points: Vec<SensorPoint>,
}

impl Sht3x {
    /// Open I2C bus 1. Addresses are switched per read, so several sensors
    /// can share the bus.
    pub fn new(points: Vec<SensorPoint>) -> anyhow::Result<Self> {
        let i2c = I2c::new()?;
        tracing::info!(points = ?points, "sht3x initialised");
        Ok(Self { i2c, points })
    }

    fn measure(&mut self, addr: u16) -> anyhow::Result<(f64, f64)> {
        self.i2c.set_slave_address(addr)?;
        self.i2c.write(&CMD_MEASURE_HIGH)?;
        thread::sleep(MEASURE_WAIT);

        let mut buf = [0u8; 6];
        let n = self.i2c.read(&mut buf)?;
        anyhow::ensure!(n == buf.len(), "short read: {n} bytes");
        decode(&buf)
    }

    /// Read every point. A failed point is published with both values
    /// absent so the hub sees it go stale.
    pub fn read_all(&mut self) -> Vec<Reading> {
        let points = self.points.clone();
        points
            .into_iter()
            .map(|p| match self.measure(p.addr) {
                Ok((t, h)) => Reading {
                    sensor_id: p.sensor_id,
                    temp_c: Some(t),
                    rh: Some(h),
                },
                Err(e) => {
                    tracing::error!(
                        addr = format_args!("0x{:02x}", p.addr),
                        sensor_id = %p.sensor_id,
                        "sht3x read failed: {e:#}"
                    );
                    Reading {
                        sensor_id: p.sensor_id,
                        temp_c: None,
                        rh: None,
                    }
                }
            })
            .collect()
    }
}

// ── Point parsing ───────────────────────────────────────────────────────────

/// Parse the `SENSOR_POINTS` env var: comma-separated `id=addr` pairs,
/// e.g. `"canopy=0x44,top=0x45"`. Empty means that default.
pub fn parse_points(env_val: &str) -> anyhow::Result<Vec<SensorPoint>> {
    let input = if env_val.trim().is_empty() {
        "canopy=0x44,top=0x45"
    } else {
        env_val
    };
    let mut points: Vec<SensorPoint> = Vec::new();

    for token in input.split(',') {
        let (id, addr) = token
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected id=addr in SENSOR_POINTS: {token:?}"))?;
        let (id, addr) = (id.trim(), addr.trim());
        anyhow::ensure!(!id.is_empty(), "empty sensor id in SENSOR_POINTS: {token:?}");

        let digits = addr
            .strip_prefix("0x")
            .or_else(|| addr.strip_prefix("0X"))
            .unwrap_or(addr);
        let addr = u16::from_str_radix(digits, 16)
            .map_err(|_| anyhow::anyhow!("invalid address in SENSOR_POINTS: {token:?}"))?;
        anyhow::ensure!(
            VALID_ADDRS.contains(&addr),
            "address {addr:#04x} is not an SHT3x address (0x44 or 0x45)"
        );
        anyhow::ensure!(
            points.iter().all(|p| p.addr != addr && p.sensor_id != id),
            "duplicate point in SENSOR_POINTS: {token:?}"
        );

        points.push(SensorPoint {
            addr,
            sensor_id: id.to_string(),
        });
    }

    Ok(points)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(t: u16, h: u16) -> [u8; 6] {
        let [t0, t1] = t.to_be_bytes();
        let [h0, h1] = h.to_be_bytes();
        [t0, t1, crc8(&[t0, t1]), h0, h1, crc8(&[h0, h1])]
    }

    // -- CRC ------------------------------------------------------------------

    #[test]
    fn crc_matches_datasheet_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn crc_of_nothing_is_init() {
        assert_eq!(crc8(&[]), CRC_INIT);
    }

    // -- Conversion -----------------------------------------------------------

    #[test]
    fn conversion_endpoints() {
        assert_eq!(raw_to_temp_c(0), -45.0);
        assert!((raw_to_temp_c(u16::MAX) - 130.0).abs() < 1e-9);
        assert_eq!(raw_to_rh(0), 0.0);
        assert!((raw_to_rh(u16::MAX) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn decodes_a_valid_frame() {
        let (t, h) = decode(&frame(0x6666, 0x8000)).unwrap();
        assert!((t - 25.0).abs() < 0.01, "temp: {t}");
        assert!((h - 50.0).abs() < 0.01, "rh: {h}");
    }

    #[test]
    fn rejects_corrupt_temperature_word() {
        let mut buf = frame(0x6666, 0x8000);
        buf[2] ^= 0xFF;
        let err = decode(&buf).unwrap_err().to_string();
        assert!(err.contains("temperature crc"), "{err}");
    }

    #[test]
    fn rejects_corrupt_humidity_word() {
        let mut buf = frame(0x6666, 0x8000);
        buf[4] ^= 0x01;
        let err = decode(&buf).unwrap_err().to_string();
        assert!(err.contains("humidity crc"), "{err}");
    }

    // -- Point parsing --------------------------------------------------------

    #[test]
    fn parse_points_default() {
        let points = parse_points("").unwrap();
        assert_eq!(
            points,
            vec![
                SensorPoint {
                    addr: 0x44,
                    sensor_id: "canopy".into()
                },
                SensorPoint {
                    addr: 0x45,
                    sensor_id: "top".into()
                },
            ]
        );
    }

    #[test]
    fn parse_points_explicit_with_whitespace() {
        let points = parse_points(" top = 45 ").unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].sensor_id, "top");
        assert_eq!(points[0].addr, 0x45);
    }

    #[test]
    fn parse_points_rejects_bad_input() {
        assert!(parse_points("canopy").is_err());
        assert!(parse_points("canopy=zz").is_err());
        assert!(parse_points("canopy=0x40").is_err());
        assert!(parse_points("=0x44").is_err());
        assert!(parse_points("canopy=0x44,top=0x44").is_err());
        assert!(parse_points("canopy=0x44,canopy=0x45").is_err());
    }
}
