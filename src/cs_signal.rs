//! Signal Modulation: Bytebuffer als DCC Pulsfolge auf die Gleisleitung ausgeben.
//!
//! DCC kodiert ein Bit über die Dauer der beiden Halbperioden eines Pulses:
//! logisch 1 = 58us pro Halbperiode, logisch 0 = 110us. Der Referenztimer
//! läuft mit 14.7456MHz, die Comparewerte unten entsprechen diesen Zeiten.
//! Pro Compare Match wechselt der Ausgangspegel; an der fallenden Flanke wird
//! der Comparewert für das nächste Bit geladen (die Bitgrenze liegt damit auf
//! der nächsten steigenden Flanke). Ohne aktiven Buffer werden dauernd 1er
//! ausgegeben, das entspricht dem Preamble Muster und ist harmlos.

use std::{
  sync::mpsc::{self, Receiver, SyncSender},
  thread,
  time::{Duration, Instant},
};

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use lazy_static::lazy_static;
use log::{error, warn};

use crate::cs_dcc::DccPacket;

/// Taktfrequenz des Referenztimers
pub const F_CPU: u32 = 14_745_600;
/// Halbperiode logisch 1: 852 Ticks = 58us bei 14.7456MHz, Prescaler 1
const SIGNAL_HALF_PERIOD_1: u16 = 852;
/// Halbperiode logisch 0: 1617 Ticks = 110us bei 14.7456MHz, Prescaler 1
const SIGNAL_HALF_PERIOD_0: u16 = 1617;
/// Max. Paketgrösse die der Modulator ausgeben kann
pub const SIGNAL_MAX_BYTES: usize = 15;
/// Ausgang Gleissignal GPIO 18 (Pin 12)
const GPIO_TRACK: u32 = 18;
/// Unterhalb dieser Restzeit wird aktiv gewartet statt geschlafen,
/// thread::sleep ist für 58us Halbperioden zu grob
const SIGNAL_SPIN_GRENZE: Duration = Duration::from_micros(150);

lazy_static! {
  //Der Gleisausgang wird vom Signal Thread und beim Terminieren (Power Off)
  //verwendet -> wird einmal hier erstellt.
  static ref GPIO_TRACK_LINE_HANDLE: LineHandle = Chip::new("/dev/gpiochip0")
    .expect("/dev/gpiochip0 konnte nicht geöffnet werden")
    .get_line(GPIO_TRACK)
    .expect("GPIO_TRACK konnte nicht geöffnet werden")
    .request(LineRequestFlags::OUTPUT, 0, "output_dcc_track")
    .expect("GPIO_TRACK konnte nicht als Output geöffnet werden");
}

/// Zustand des Modulators: Buffer plus Position des aktuellen Bits.
/// Die Bits eines Bytes werden ab MSB (Bit 7) gesendet, Byte 0 zuerst.
struct SignalState {
  bytes: [u8; SIGNAL_MAX_BYTES],
  size: usize,
  cur_byte: usize,
  cur_bit: u32,
  /// Aktueller Comparewert, Dauer der laufenden Halbperiode in Timerticks
  compare: u16,
}

impl SignalState {
  /// Neuer Zustand ohne aktiven Buffer, gibt 1er aus
  fn new() -> SignalState {
    SignalState {
      bytes: [0; SIGNAL_MAX_BYTES],
      size: 0,
      cur_byte: 0,
      cur_bit: 0,
      compare: SIGNAL_HALF_PERIOD_1,
    }
  }

  /// Neuen Bytebuffer übernehmen und die erste Halbperiode (MSB von Byte 0)
  /// laden. Der Aufruf ersetzt einen laufenden Buffer an der Bitgrenze.
  /// # Arguments
  /// * bytes - Die zu sendenden Bytes, max. SIGNAL_MAX_BYTES
  fn send(&mut self, bytes: &[u8]) {
    assert!(
      bytes.len() <= SIGNAL_MAX_BYTES,
      "Signal Buffer > SIGNAL_MAX_BYTES"
    );
    self.size = bytes.len();
    self.bytes[..bytes.len()].copy_from_slice(bytes);
    self.cur_byte = 0;
    self.cur_bit = 7;
    self.generate_bit(self.bytes[0] & (1 << self.cur_bit));
    self.cur_bit -= 1;
  }

  /// Comparewert für ein Bit laden: alles was nicht 0 ist, ist ein 1er
  fn generate_bit(&mut self, bit: u8) {
    self.compare = if bit == 0 {
      SIGNAL_HALF_PERIOD_0
    } else {
      SIGNAL_HALF_PERIOD_1
    };
  }

  /// Timer Compare Match, der Ausgangspegel hat soeben gewechselt.
  /// # Arguments
  /// * line_high - Pegel nach dem Wechsel. An der steigenden Flanke beginnt
  ///               das neue Bit, der Comparewert bleibt für dessen zweite
  ///               Halbperiode stehen. An der fallenden Flanke wird das
  ///               nächste Bit bestimmt.
  fn compare_match(&mut self, line_high: bool) {
    if line_high {
      //Steigende Flanke: selber Comparewert taktet auch die fallende Flanke
      return;
    }
    if self.cur_byte < self.size && self.cur_bit > 0 {
      //Es hat noch Bits im aktuellen Byte
      self.generate_bit(self.bytes[self.cur_byte] & (1 << self.cur_bit));
      self.cur_bit -= 1;
    } else if self.size > 0 && self.cur_bit == 0 && self.cur_byte < self.size - 1 {
      //Bytegrenze: letztes Bit ausgeben, dann weiter mit dem nächsten Byte
      self.generate_bit(self.bytes[self.cur_byte] & 0x01);
      self.cur_byte += 1;
      self.cur_bit = 7;
    } else if self.size > 0 && self.cur_bit == 0 && self.cur_byte == self.size - 1 {
      //Letztes Bit des letzten Bytes
      self.generate_bit(self.bytes[self.cur_byte] & 0x01);
      self.cur_byte += 1;
    } else {
      //Kein Buffer aktiv: 1er bis zum nächsten send
      self.generate_bit(1);
    }
  }
}

/// Dauer einer Halbperiode aus Timerticks (Prescaler 1)
fn ticks_to_duration(ticks: u16) -> Duration {
  Duration::from_nanos(ticks as u64 * 1_000_000_000 / F_CPU as u64)
}

/// Gleis stromlos schalten (bei Programmende)
pub fn track_power_off() {
  if let Err(msg) = GPIO_TRACK_LINE_HANDLE.set_value(0) {
    warn!("Signal: Gleis Power Off fehlgeschlagen: {}", msg);
  }
}

/// Startet den Modulator Thread.
/// Liefert den Sender über den der Scheduler die Paketbuffer übergibt, ein
/// übergebener Buffer wird an der nächsten Bitgrenze übernommen.
pub fn start() -> SyncSender<DccPacket> {
  let (tx, rx) = mpsc::sync_channel(1);
  thread::Builder::new()
    .name("Signal_Thread".to_string())
    .spawn(move || execute(rx))
    .unwrap();
  tx
}

/// Ausführung als Thread: Pegel im Halbperiodenraster wechseln
/// # Arguments
/// * rx - Channel Receiver über den neue Paketbuffer empfangen werden
fn execute(rx: Receiver<DccPacket>) {
  let mut state = SignalState::new();
  let mut line_high = false;
  let mut naechste_flanke = Instant::now() + ticks_to_duration(state.compare);
  loop {
    warte_bis(naechste_flanke);
    line_high = !line_high;
    if let Err(msg) = GPIO_TRACK_LINE_HANDLE.set_value(u8::from(line_high)) {
      error!("Signal: GPIO schreiben fehlgeschlagen: {}", msg);
    }
    //Die soeben gestartete Halbperiode läuft mit dem aktuellen Comparewert
    naechste_flanke += ticks_to_duration(state.compare);
    if line_high {
      state.compare_match(true);
    } else {
      //Fallende Flanke: ein neuer Buffer wird genau hier übernommen und
      //beginnt mit der nächsten steigenden Flanke
      match rx.try_recv() {
        Ok(packet) => state.send(packet.bytes()),
        Err(_) => state.compare_match(false),
      }
    }
  }
}

/// Bis zum Zeitpunkt der nächsten Flanke warten
fn warte_bis(zeitpunkt: Instant) {
  loop {
    let jetzt = Instant::now();
    if jetzt >= zeitpunkt {
      return;
    }
    let rest = zeitpunkt - jetzt;
    if rest > SIGNAL_SPIN_GRENZE {
      thread::sleep(rest - SIGNAL_SPIN_GRENZE);
    } else {
      std::hint::spin_loop();
    }
  }
}
