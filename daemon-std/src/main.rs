//! Roamcore — host daemon shim
//!
//! Thread-based NDJSON shim around one `RoamEngine` instance. A reader
//! thread feeds stdin lines into an mpsc channel; the main loop consumes
//! lines and timer ticks sequentially, mutating engine state and writing
//! engine actions to stdout. Stands in for the platform daemon the engine
//! is embedded in, and doubles as an end-to-end harness: pipe driver
//! events in, observe scan and association requests out.

use std::io::{self, BufRead, Write as _};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use roamcore::bss::{BssRecord, Ticks};
use roamcore::engine::{Actions, EngineAction, RoamEngine};
use roamcore::policy::{ConnectionProfile, KeyMgmt};
use roamcore::protocol::{
    self, format_mac, scan_message, DriverEvent, EngineMessage, MacString, MAX_MSG_LEN,
};

/// Engine poll cadence while stdin is quiet.
const TICK_MS: u64 = 250;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let ssid = args.next().unwrap_or_else(|| "default".into());
    let key_mgmt = match args.next().as_deref() {
        Some("open") => KeyMgmt::Open,
        Some("sae") => KeyMgmt::Sae,
        Some("8021x") => KeyMgmt::Ieee8021x,
        Some("eap") => KeyMgmt::WpaEap,
        Some("eap-suite-b-192") => KeyMgmt::WpaEapSuiteB192,
        Some("psk") | None => KeyMgmt::Psk,
        Some(other) => anyhow::bail!("unknown key management class '{other}'"),
    };
    log::info!("engine for ssid '{ssid}' ({key_mgmt:?})");

    // Reader thread: stdin lines into the same channel the timer drains,
    // so all engine input is serialized through one loop.
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let boot = Instant::now();
    let mut engine = RoamEngine::new(ConnectionProfile::new(&ssid, key_mgmt));
    // BSS lines accumulate here until the delivery's scan_done
    let mut delivery: Vec<BssRecord> = Vec::new();

    loop {
        let input = rx.recv_timeout(Duration::from_millis(TICK_MS));
        let now = boot.elapsed().as_millis() as Ticks;
        match input {
            Ok(line) => handle_line(&mut engine, &mut delivery, &line, now)?,
            Err(RecvTimeoutError::Timeout) => {
                let actions = engine.poll(now);
                emit(&actions)?;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn handle_line(
    engine: &mut RoamEngine,
    delivery: &mut Vec<BssRecord>,
    line: &str,
    now: Ticks,
) -> Result<()> {
    let Some(event) = protocol::parse_event(line.as_bytes()) else {
        if !line.trim().is_empty() {
            log::warn!("dropping malformed event line");
        }
        return Ok(());
    };

    let actions = match event {
        DriverEvent::ScanStart => {
            delivery.clear();
            Actions::new()
        }
        DriverEvent::Bss(observation) => {
            delivery.push(observation.into_record(now));
            Actions::new()
        }
        DriverEvent::ScanDone => {
            let records = std::mem::take(delivery);
            // Profile-to-BSS compatibility matching lives in the platform's
            // profile store; this shim admits every record.
            engine.on_scan_results(&records, now, |_| true)
        }
        DriverEvent::Hint(hint) => engine.on_hint(hint, now),
        DriverEvent::Connected(bssid) => engine.on_associated(bssid, now),
        DriverEvent::Disconnected => engine.on_disassociated(now),
        DriverEvent::AssocOk => engine.on_association_result(true),
        DriverEvent::AssocFail => engine.on_association_result(false),
        DriverEvent::StatusQuery => {
            write_status(engine)?;
            Actions::new()
        }
    };
    emit(&actions)
}

fn emit(actions: &Actions) -> Result<()> {
    for action in actions {
        match action {
            EngineAction::RequestScan(request) => write_message(&scan_message(request))?,
            EngineAction::Associate(target) => {
                let mut mac = MacString::new();
                format_mac(*target, &mut mac);
                write_message(&EngineMessage::Associate { mac: &mac })?;
            }
        }
    }
    Ok(())
}

fn write_status(engine: &RoamEngine) -> Result<()> {
    let mac = engine.current_bss().map(|bssid| {
        let mut buf = MacString::new();
        format_mac(bssid, &mut buf);
        buf
    });
    write_message(&EngineMessage::Status {
        connected: mac.is_some(),
        mac: mac.as_ref(),
        tracked: engine.tracked_bss_count(),
        version: protocol::VERSION,
    })
}

fn write_message(msg: &EngineMessage) -> Result<()> {
    let mut buf = [0u8; MAX_MSG_LEN];
    let len = protocol::serialize_message(msg, &mut buf).context("message serialization failed")?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(&buf[..len])?;
    handle.flush()?;
    Ok(())
}
