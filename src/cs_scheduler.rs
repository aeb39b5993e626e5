//! Paket Scheduler: entscheidet pro Refresh Tick was gesendet wird.
//!
//! Neue Pakete aus der Eingangsqueue haben Vorrang und werden danach in den
//! Refresh Cache übernommen. Ohne neue Pakete wird ein gehaltener Broadcast
//! Stop, sonst reihum ein Cacheeintrag, als letzte Möglichkeit das Idle
//! Paket gesendet.

use std::{
  sync::{
    mpsc::{self, Receiver, SyncSender},
    Arc, Mutex,
  },
  thread,
  time::Duration,
};

use log::warn;

use crate::{cs_cache::Cache, cs_dcc::DccPacket, cs_signal::F_CPU, cs_sys};

/// Timerperiode des Refresh Ticks: 124 Ticks bei 14.7456MHz und Prescaler
/// 1024, ca. 8.6ms
const SCHEDULER_FLUSH_PERIOD: u32 = 124;
const SCHEDULER_PRESCALER: u32 = 1024;
/// Kapazität der Eingangsqueue für neue Pakete
pub const SCHEDULER_TX_QUEUE_LEN: usize = 20;

/// Dauer eines Refresh Ticks
fn tick_period() -> Duration {
  Duration::from_nanos(
    SCHEDULER_FLUSH_PERIOD as u64 * SCHEDULER_PRESCALER as u64 * 1_000_000_000 / F_CPU as u64,
  )
}

struct Scheduler {
  /// Eingangsqueue mit neuen Paketen aus dem Parser
  rx: Receiver<DccPacket>,
  /// Übergabe der Paketbuffer an den Modulator
  signal_tx: SyncSender<DccPacket>,
  /// Refresh Cache, geteilt mit den Systemkommandos der Konsole
  cache: Arc<Mutex<Cache>>,
  /// Einmal vorgebautes Idle Paket
  idle_packet: DccPacket,
  /// Gehaltener Broadcast Stop. Solange vorhanden ist der Cache leer und
  /// der Stop wird bis zum nächsten neuen Kommando wiederholt.
  stop_packet: Option<DccPacket>,
}

impl Scheduler {
  /// Paketbytes an den Modulator übergeben
  fn signal_send(&self, packet: &DccPacket) {
    if self.signal_tx.try_send(packet.clone()).is_err() {
      warn!("Scheduler: Übergabe an Signal Modulator fehlgeschlagen");
    }
  }

  /// Ein Refresh Tick: neues Paket senden und cachen, sonst Refresh.
  /// Priorität beim Refresh: gehaltener Broadcast Stop, dann Cache reihum,
  /// als letzte Möglichkeit das Idle Paket.
  fn tick(&mut self) {
    if let Ok(packet) = self.rx.try_recv() {
      self.signal_send(&packet);
      //Jedes neue Kommando macht einen gehaltenen Broadcast Stop hinfällig
      self.stop_packet = None;
      if packet.is_broadcast_stop() {
        //Broadcast Stop wird gehalten statt gecached, der Cache wird geleert
        self.cache.lock().unwrap().clear();
        self.stop_packet = Some(packet);
      } else {
        self.cache.lock().unwrap().update(packet);
      }
    } else if let Some(stop) = &self.stop_packet {
      self.signal_send(&stop.clone());
    } else {
      let mut cache = self.cache.lock().unwrap();
      match cache.get_next() {
        Some(cached) => {
          let packet = cached.clone();
          drop(cache);
          self.signal_send(&packet);
        }
        None => {
          drop(cache);
          self.signal_send(&self.idle_packet);
        }
      }
    }
  }
}

/// Startet den Scheduler Thread.
/// Liefert den Sender der Eingangsqueue für den Parser zurück.
/// # Arguments
/// * cache - Refresh Cache, geteilt mit der Konsole
/// * signal_tx - Übergabekanal zum Signal Modulator
pub fn start(cache: Arc<Mutex<Cache>>, signal_tx: SyncSender<DccPacket>) -> SyncSender<DccPacket> {
  let (tx, rx) = mpsc::sync_channel(SCHEDULER_TX_QUEUE_LEN);
  let mut idle_packet = DccPacket::baseline();
  idle_packet.special_idle();
  let mut scheduler = Scheduler {
    rx,
    signal_tx,
    cache,
    idle_packet,
    stop_packet: None,
  };
  thread::Builder::new()
    .name("Scheduler_Thread".to_string())
    .spawn(move || loop {
      thread::sleep(tick_period());
      scheduler.tick();
    })
    .unwrap();
  tx
}

/// Neues Paket in die Eingangsqueue stellen.
/// Bei voller Queue wird das Paket stillschweigend verworfen, der Verlust
/// ist nur über den Statistikzähler sichtbar.
/// # Arguments
/// * tx - Der von start gelieferte Sender der Eingangsqueue
/// * packet - Das einzureihende Paket, die Queue übernimmt es
pub fn add_packet(tx: &SyncSender<DccPacket>, packet: DccPacket) {
  if tx.try_send(packet).is_err() {
    cs_sys::queue_drop_increment();
  }
}
