//! GPS position side channel.
//!
//! Reads NMEA sentences from a u-blox receiver on a serial port, keeps only
//! the GGA fixes and appends `<epoch_microseconds>,<lat>,<lon>,<alt>` lines
//! to a log file. Optionally pushes a UBX configuration first: solution rate
//! and GGA-only NMEA output on UART1. Completely independent of the pulse
//! pipeline; they only share the output directory.

use failure::Error;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const UBX_SYNC: [u8; 2] = [0xB5, 0x62];

/// Frame a UBX message: sync chars, class, id, little-endian payload length,
/// payload, then the two-byte Fletcher checksum over everything after the
/// sync chars.
pub fn ubx_frame(class: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(payload.len() + 8);
    msg.extend_from_slice(&UBX_SYNC);
    msg.push(class);
    msg.push(id);
    msg.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    msg.extend_from_slice(payload);
    let (ck_a, ck_b) = fletcher(&msg[2..]);
    msg.push(ck_a);
    msg.push(ck_b);
    msg
}

fn fletcher(bytes: &[u8]) -> (u8, u8) {
    let mut ck_a = 0u8;
    let mut ck_b = 0u8;
    for b in bytes {
        ck_a = ck_a.wrapping_add(*b);
        ck_b = ck_b.wrapping_add(ck_a);
    }
    (ck_a, ck_b)
}

/// UBX-CFG-RATE frame requesting `hz` navigation solutions per second.
pub fn cfg_rate(hz: u16) -> Vec<u8> {
    let meas_rate_ms = 1000 / hz.max(1);
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&meas_rate_ms.to_le_bytes());
    payload.extend_from_slice(&1u16.to_le_bytes()); // navRate
    payload.extend_from_slice(&1u16.to_le_bytes()); // timeRef
    ubx_frame(0x06, 0x08, &payload)
}

/// UBX-CFG-MSG frames that enable GGA at `gga_rate` on UART1 and silence
/// every other standard NMEA sentence.
pub fn cfg_nmea_messages(gga_rate: u8) -> Vec<Vec<u8>> {
    const NMEA_MSGS: [(u8, u8); 12] = [
        (0xF0, 0x00), // GGA
        (0xF0, 0x01),
        (0xF0, 0x02),
        (0xF0, 0x03),
        (0xF0, 0x04),
        (0xF0, 0x05),
        (0xF0, 0x06),
        (0xF0, 0x07),
        (0xF0, 0x08),
        (0xF0, 0x09),
        (0xF0, 0x0D),
        (0xF0, 0x0F),
    ];

    NMEA_MSGS
        .iter()
        .map(|&(class, id)| {
            let rate = if id == 0x00 { gga_rate } else { 0 };
            // Per-port output rates: I2C, UART1, UART2, USB, SPI, reserved.
            let payload = [class, id, 0, rate, 0, 0, 0, 0];
            ubx_frame(0x06, 0x01, &payload)
        })
        .collect()
}

/// Push the UBX configuration the collector expects. The receiver wants a
/// moment between messages.
pub fn configure<W: Write + ?Sized>(port: &mut W, rate_hz: u16) -> Result<(), Error> {
    port.write_all(&cfg_rate(rate_hz))?;
    thread::sleep(Duration::from_millis(100));
    for msg in cfg_nmea_messages(1) {
        port.write_all(&msg)?;
        thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}

/// One parsed GGA fix, in signed decimal degrees and meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaFix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Parse an NMEA sentence, returning a fix for GGA sentences from any talker
/// ($GPGGA, $GNGGA, ...) and `None` for everything else.
pub fn parse_gga(line: &str) -> Option<GgaFix> {
    if !line.starts_with('$') || line.get(3..6) != Some("GGA") {
        return None;
    }
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 10 {
        return None;
    }
    let lat = nmea_to_decimal(fields[2], fields[3])?;
    let lon = nmea_to_decimal(fields[4], fields[5])?;
    let alt: f64 = fields[9].parse().ok()?;
    Some(GgaFix { lat, lon, alt })
}

/// NMEA packs coordinates as `ddmm.mmmm`; an empty field reads as zero,
/// matching a receiver that has no fix yet.
fn nmea_to_decimal(coord: &str, hemisphere: &str) -> Option<f64> {
    if coord.is_empty() {
        return Some(0.0);
    }
    let raw: f64 = coord.parse().ok()?;
    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if hemisphere == "S" || hemisphere == "W" {
        decimal = -decimal;
    }
    Some(decimal)
}

pub fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// One log record. Downstream tooling splits on commas.
pub fn format_record(micros: u64, fix: &GgaFix) -> String {
    format!(
        "{},{:.9},{:.9},{:.9}",
        micros, fix.lat, fix.lon, fix.alt
    )
}

/// Read NMEA lines from `port` until `stop` flips or the stream ends,
/// appending every GGA fix to `out`.
pub fn collect<R: Read, W: Write>(port: R, out: &mut W, stop: &AtomicBool) -> Result<(), Error> {
    let mut reader = BufReader::new(port);
    let mut raw = Vec::new();
    while !stop.load(Ordering::Relaxed) {
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {
                // Serial noise can corrupt a byte mid-sentence; a lossy
                // conversion just makes that sentence fail the GGA parse.
                let line = String::from_utf8_lossy(&raw);
                if let Some(fix) = parse_gga(line.trim_end()) {
                    writeln!(out, "{}", format_record(epoch_micros(), &fix))?;
                }
                raw.clear();
            }
            // A quiet port is not an error; keep any partial sentence and
            // try again so the stop flag stays responsive.
            Err(ref e)
                if e.kind() == io::ErrorKind::TimedOut
                    || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
