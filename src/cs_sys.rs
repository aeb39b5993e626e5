//! Systemkommandos und Betriebsstatistik.
//!
//! Die Zähler werden aus der Konsolenschleife und vom Scheduler Thread
//! inkrementiert und sind deshalb atomar. Die Systemkommandos liefern ihre
//! mehrzeilige Ausgabe als String zurück, die Konsole gibt sie aus.

use std::sync::{
  atomic::{AtomicU32, Ordering},
  Arc, Mutex,
};

use crate::cs_cache::Cache;
use crate::cs_dcc::{DccPacket, DccRichtung};

static SYS_TX_COUNT: AtomicU32 = AtomicU32::new(0);
static SYS_TX_BYTES_COUNT: AtomicU32 = AtomicU32::new(0);
static SYS_PARSE_ERR_COUNT: AtomicU32 = AtomicU32::new(0);
static SYS_PARSE_OK_COUNT: AtomicU32 = AtomicU32::new(0);
static SYS_SYS_CMD_COUNT: AtomicU32 = AtomicU32::new(0);
static SYS_QUEUE_DROP_COUNT: AtomicU32 = AtomicU32::new(0);

/// Systemkommandos aus der DSL
#[derive(Debug, PartialEq)]
pub enum SysCmd {
  /// show status: Betriebsstatistik ausgeben
  Status,
  /// help: Kommandoübersicht ausgeben
  Help,
  /// cache clear: Refresh Cache leeren
  CacheClear,
  /// cache show N: gecachtes Paket der Lok N anzeigen
  CacheShow { address: u32 },
}

/// Versand eines DCC/Raw Paketes verbuchen
pub fn process_dcc_tx(packet: &DccPacket) {
  SYS_TX_COUNT.fetch_add(1, Ordering::Relaxed);
  SYS_TX_BYTES_COUNT.fetch_add(packet.size() as u32, Ordering::Relaxed);
}

/// Ausführung eines Systemkommandos verbuchen
pub fn process_sys_cmd() {
  SYS_SYS_CMD_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn parse_ok_increment() {
  SYS_PARSE_OK_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn parse_err_increment() {
  SYS_PARSE_ERR_COUNT.fetch_add(1, Ordering::Relaxed);
}

/// Verworfenes Paket wegen voller Schedulerqueue verbuchen
pub fn queue_drop_increment() {
  SYS_QUEUE_DROP_COUNT.fetch_add(1, Ordering::Relaxed);
}

pub fn queue_drop_count() -> u32 {
  SYS_QUEUE_DROP_COUNT.load(Ordering::Relaxed)
}

/// Führt ein Systemkommando aus und liefert die Konsolenausgabe
/// # Arguments
/// * cmd - Das auszuführende Kommando
/// * cache - Refresh Cache, geteilt mit dem Scheduler Thread
pub fn execute(cmd: &SysCmd, cache: &Arc<Mutex<Cache>>) -> String {
  match cmd {
    SysCmd::Status => cmd_status(cache),
    SysCmd::Help => cmd_help(),
    SysCmd::CacheClear => cmd_cache_clear(cache),
    SysCmd::CacheShow { address } => cmd_cache_show(cache, *address),
  }
}

/// Alle Betriebszähler ausgeben
fn cmd_status(cache: &Arc<Mutex<Cache>>) -> String {
  let (cache_used, cache_total) = {
    let cache = cache.lock().unwrap();
    (cache.current_size(), cache.total_size())
  };
  let parse_ok = SYS_PARSE_OK_COUNT.load(Ordering::Relaxed);
  let parse_err = SYS_PARSE_ERR_COUNT.load(Ordering::Relaxed);
  let mut out = String::from("system details\n");
  out.push_str(&format!(
    "  sys_cmd_total:\t{}\n",
    SYS_SYS_CMD_COUNT.load(Ordering::Relaxed)
  ));
  out.push_str(&format!(
    "  dcc_tx_packets:\t{}\n",
    SYS_TX_COUNT.load(Ordering::Relaxed)
  ));
  out.push_str(&format!(
    "  dcc_tx_bytes:\t\t{}\n",
    SYS_TX_BYTES_COUNT.load(Ordering::Relaxed)
  ));
  out.push_str(&format!("  parse_errors:\t\t{}\n", parse_err));
  out.push_str(&format!("  parse_ok:\t\t{}\n", parse_ok));
  out.push_str(&format!("  parse_total:\t\t{}\n", parse_ok + parse_err));
  out.push_str(&format!("  queue_drops:\t\t{}\n", queue_drop_count()));
  out.push_str(&format!("  cache_used:\t\t{}/{}\n", cache_used, cache_total));
  out.push_str(&format!(
    "  cache_free_percent:\t{:.2}%\n\n",
    ((cache_total - cache_used) as f64 / cache_total as f64) * 100.0
  ));
  out
}

/// Kommandoübersicht
fn cmd_help() -> String {
  String::from(
    "available commands\n\
     \x20 forward|fw addr|ad N speed|sp N\n\
     \x20 reverse|rv addr|ad N speed|sp N\n\
     \x20 stop [addr N | all]\n\
     \x20 raw 0x<hex bytes>\n\
     \x20 cache show N\n\
     \x20 cache clear\n\
     \x20 show status\n\
     \x20 help\n\n",
  )
}

/// Refresh Cache leeren und die Anzahl entfernter Einträge melden
fn cmd_cache_clear(cache: &Arc<Mutex<Cache>>) -> String {
  let mut cache = cache.lock().unwrap();
  let curr = cache.current_size();
  cache.clear();
  format!("{} item(s) purged\n\n", curr)
}

/// Details des gecachten Paketes einer Lok anzeigen
fn cmd_cache_show(cache: &Arc<Mutex<Cache>>, address: u32) -> String {
  let cache = cache.lock().unwrap();
  let cached = u8::try_from(address).ok().and_then(|adr| cache.get(adr));
  match cached {
    None => format!("no cached packet for loco with address {}\n\n", address),
    Some(packet) => {
      let mut out = String::from("cached packet details\n");
      out.push_str(&format!("  address:\t{}\n", address));
      out.push_str(&format!("  speed:\t{}\n", packet.get_speed_step()));
      out.push_str(&format!(
        "  direction:\t{}\n",
        if packet.get_direction() == DccRichtung::Vorwaerts {
          "forward"
        } else {
          "reverse"
        }
      ));
      out.push_str(&format!("  hex:\t\t{}\n", packet.hex_dump()));
      out.push_str(&format!("  binary:\t{}\n\n", packet.dump()));
      out
    }
  }
}
