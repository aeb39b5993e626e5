//! Konsole: zeilenorientierte Kommandoeingabe über die serielle
//! Schnittstelle (8-N-1) oder ersatzweise stdin/stdout.
//!
//! Die Konsole ist die Zeichenquelle des DSL Parsers. Empfangene Zeichen
//! werden als Echo zurückgesendet, Tab wird zu Leerzeichen und CR zu LF
//! normalisiert. Nach jedem Kommando wird der Prompt ausgegeben, gültige
//! Fahrkommandos werden mit "ok", ungültige mit "parse error" quittiert.

use std::{
  collections::HashMap,
  fs::{File, OpenOptions},
  io::{self, Read, Write},
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

use log::warn;
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};

use crate::{
  cs_cache::Cache,
  cs_dcc::DccPacket,
  cs_dsl::{self, DslInput, DslResult},
  cs_sys,
};

/// Konsolenprompt
const IO_PROMPT: &str = "freedcc> ";
/// Default Baudrate der seriellen Schnittstelle
const IO_DEFAULT_BAUD: u32 = 9600;
/// Pause nach Streamende/Lesefehler bevor erneut gelesen wird
const IO_RETRY_PAUSE: Duration = Duration::from_millis(200);

pub struct Console {
  reader: Box<dyn Read + Send>,
  writer: Box<dyn Write + Send>,
  /// Ein Zeichen Pushback für das vorausgelesene erste Kommandozeichen
  pushback: Option<u8>,
  /// true solange kein angefangene Zeile offen ist, steuert flush
  at_line_end: bool,
}

impl Console {
  /// Konsole öffnen.
  /// Mit device-Angabe in der Konfiguration wird die serielle Schnittstelle
  /// roh auf 8-N-1 konfiguriert, ohne Angabe wird stdin/stdout verwendet.
  /// # Arguments
  /// * config_station - Der [station] Abschnitt des Konfigfiles
  pub fn new(config_station: &HashMap<String, Option<String>>) -> Result<Console, String> {
    let (reader, writer): (Box<dyn Read + Send>, Box<dyn Write + Send>) =
      match config_station.get("device") {
        Some(device) => {
          let device = device
            .as_ref()
            .ok_or("station: device Parameter ohne Wert")?;
          let baud = match config_station.get("baud") {
            Some(baud) => baud
              .as_ref()
              .ok_or("station: baud Parameter ohne Wert")?
              .parse::<u32>()
              .ok()
              .ok_or("station: baud muss eine Zahl sein")?,
            None => IO_DEFAULT_BAUD,
          };
          let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|err| format!("Konsole {} kann nicht geöffnet werden: {}", device, err))?;
          configure_serial(&file, baud)?;
          let writer = file
            .try_clone()
            .map_err(|err| format!("Konsole {} clone fehlgeschlagen: {}", device, err))?;
          (Box::new(file), Box::new(writer))
        }
        None => (Box::new(io::stdin()), Box::new(io::stdout())),
      };
    Ok(Console {
      reader,
      writer,
      pushback: None,
      at_line_end: true,
    })
  }

  /// Text auf der Konsole ausgeben, LF wird als CRLF gesendet
  pub fn print(&mut self, text: &str) {
    let mut out = Vec::with_capacity(text.len() + 8);
    for c in text.bytes() {
      if c == b'\n' {
        out.push(b'\r');
      }
      out.push(c);
    }
    let _ = self.writer.write_all(&out);
  }

  /// Prompt mit führendem CR ausgeben
  fn print_prompt(&mut self) {
    let _ = self.writer.write_all(b"\r");
    let _ = self.writer.write_all(IO_PROMPT.as_bytes());
    let _ = self.writer.flush();
  }

  /// Eine Konsoleneingabe verarbeiten: Zeichen lesen, parsen, quittieren.
  /// Liefert das Paket wenn ein Fahr- oder Raw Kommando empfangen wurde.
  /// Lesefehler sind nie fatal, nach einer kurzen Pause wird weitergelesen.
  /// # Arguments
  /// * cache - Refresh Cache für die cache show/clear Systemkommandos
  pub fn read(&mut self, cache: &Arc<Mutex<Cache>>) -> Option<DccPacket> {
    let mut packet = None;
    match self.getc() {
      None => {
        thread::sleep(IO_RETRY_PAUSE);
        return None;
      }
      //Leerzeilen und führende Leerzeichen überspringen
      Some(c) if c == b'\n' || c == b' ' => {}
      Some(c) => {
        //Vorausgelesenes Zeichen gehört dem Parser
        self.pushback = Some(c);
        match cs_dsl::parser_start(self, true) {
          Ok(Some(result)) => {
            cs_sys::parse_ok_increment();
            match result {
              DslResult::Dcc(p) | DslResult::Raw(p) => {
                cs_sys::process_dcc_tx(&p);
                self.print("ok\n\n");
                packet = Some(p);
              }
              DslResult::Sys(cmd) => {
                cs_sys::process_sys_cmd();
                let out = cs_sys::execute(&cmd, cache);
                self.print(&out);
              }
            }
          }
          //Kommt mit build=true nicht vor
          Ok(None) => {}
          Err(_) => {
            cs_sys::parse_err_increment();
            self.print("parse error\n\n");
          }
        }
      }
    }
    self.print_prompt();
    packet
  }
}

impl DslInput for Console {
  /// Nächstes Zeichen lesen, normalisieren und als Echo zurücksenden
  fn getc(&mut self) -> Option<u8> {
    if let Some(c) = self.pushback.take() {
      //Bereits gelesen und geechot
      return Some(c);
    }
    let mut buffer = [0u8; 1];
    loop {
      return match self.reader.read(&mut buffer) {
        Ok(1) => {
          let c = match buffer[0] {
            b'\t' => b' ',
            b'\r' => b'\n',
            c => c,
          };
          self.at_line_end = c == b'\n';
          if c == b'\n' {
            let _ = self.writer.write_all(b"\r\n");
          } else {
            let _ = self.writer.write_all(&[c]);
          }
          Some(c)
        }
        //Streamende
        Ok(_) => None,
        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
        Err(err) => {
          warn!("Konsole: Lesefehler: {}", err);
          None
        }
      };
    }
  }

  /// Rest der aktuellen Zeile verwerfen (nach einem Parsefehler)
  fn flush(&mut self) {
    self.pushback = None;
    while !self.at_line_end {
      let mut buffer = [0u8; 1];
      match self.reader.read(&mut buffer) {
        Ok(1) => {
          if buffer[0] == b'\n' || buffer[0] == b'\r' {
            self.at_line_end = true;
          }
        }
        _ => break,
      }
    }
  }
}

/// Serielle Schnittstelle roh auf 8-N-1 mit der verlangten Baudrate setzen
fn configure_serial(file: &File, baud: u32) -> Result<(), String> {
  let rate = baud_rate(baud)?;
  let mut tio = termios::tcgetattr(file)
    .map_err(|err| format!("Konsole: tcgetattr fehlgeschlagen: {}", err))?;
  termios::cfmakeraw(&mut tio);
  //8 Datenbits, keine Parität, 1 Stopbit
  tio.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB | ControlFlags::CSIZE);
  tio.control_flags |= ControlFlags::CS8 | ControlFlags::CREAD | ControlFlags::CLOCAL;
  termios::cfsetispeed(&mut tio, rate)
    .map_err(|err| format!("Konsole: cfsetispeed fehlgeschlagen: {}", err))?;
  termios::cfsetospeed(&mut tio, rate)
    .map_err(|err| format!("Konsole: cfsetospeed fehlgeschlagen: {}", err))?;
  termios::tcsetattr(file, SetArg::TCSANOW, &tio)
    .map_err(|err| format!("Konsole: tcsetattr fehlgeschlagen: {}", err))?;
  Ok(())
}

/// Baudrate aus der Konfiguration in den termios Wert übersetzen
fn baud_rate(baud: u32) -> Result<BaudRate, String> {
  match baud {
    2400 => Ok(BaudRate::B2400),
    4800 => Ok(BaudRate::B4800),
    9600 => Ok(BaudRate::B9600),
    19200 => Ok(BaudRate::B19200),
    38400 => Ok(BaudRate::B38400),
    57600 => Ok(BaudRate::B57600),
    115200 => Ok(BaudRate::B115200),
    _ => Err(format!("station: Baudrate {} wird nicht unterstützt", baud)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Mitlesbarer Ausgabekanal für Tests
  #[derive(Clone)]
  struct TestAusgabe {
    daten: Arc<Mutex<Vec<u8>>>,
  }

  impl TestAusgabe {
    fn new() -> TestAusgabe {
      TestAusgabe {
        daten: Arc::new(Mutex::new(Vec::new())),
      }
    }
    fn text(&self) -> String {
      String::from_utf8(self.daten.lock().unwrap().clone()).unwrap()
    }
  }

  impl Write for TestAusgabe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.daten.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  /// Konsole über einem Eingabestring bauen
  fn test_console(eingabe: &str) -> (Console, TestAusgabe) {
    let ausgabe = TestAusgabe::new();
    let console = Console {
      reader: Box::new(io::Cursor::new(eingabe.as_bytes().to_vec())),
      writer: Box::new(ausgabe.clone()),
      pushback: None,
      at_line_end: true,
    };
    (console, ausgabe)
  }

  #[test]
  fn fahrkommando_test() {
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, ausgabe) = test_console("forward addr 3 speed 8\n");
    let packet = console.read(&cache).expect("Fahrkommando muss ein Paket liefern");
    assert_eq!(packet.bytes(), &[0xFF, 0xF0, 0x19, 0xD4, 0xED]);
    //Echo, Quittung und Prompt
    let text = ausgabe.text();
    assert!(text.contains("forward addr 3 speed 8\r\n"));
    assert!(text.contains("ok\r\n\r\n"));
    assert!(text.ends_with(&format!("\r{}", IO_PROMPT)));
  }

  #[test]
  fn parse_error_test() {
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, ausgabe) = test_console("vorwaerts 3\n");
    assert!(console.read(&cache).is_none());
    assert!(ausgabe.text().contains("parse error\r\n\r\n"));
  }

  #[test]
  fn sys_kommando_test() {
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, ausgabe) = test_console("cache show 7\n");
    assert!(console.read(&cache).is_none());
    assert!(ausgabe
      .text()
      .contains("no cached packet for loco with address 7\r\n\r\n"));
  }

  #[test]
  fn leerzeile_test() {
    //Leerzeilen werden ohne Parserlauf übersprungen
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, ausgabe) = test_console("\nstop\n");
    assert!(console.read(&cache).is_none());
    let packet = console.read(&cache).expect("stop muss ein Paket liefern");
    assert!(packet.is_broadcast_stop());
    assert!(ausgabe.text().contains("ok\r\n\r\n"));
  }

  #[test]
  fn tab_normalisierung_test() {
    //Tab trennt Token wie ein Leerzeichen
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, _ausgabe) = test_console("forward\taddr\t3\tspeed\t8\n");
    let packet = console.read(&cache).expect("Fahrkommando muss ein Paket liefern");
    assert_eq!(packet.get_address(), 3);
  }

  #[test]
  fn flush_verwirft_zeilenrest_test() {
    //Nach einem Fehler am Zeilenanfang darf die Folgezeile nicht verloren gehen
    let cache = Arc::new(Mutex::new(Cache::new()));
    let (mut console, _ausgabe) = test_console("kaputt nochmehr kaputt\nstop\n");
    assert!(console.read(&cache).is_none());
    let packet = console.read(&cache).expect("stop muss ein Paket liefern");
    assert!(packet.is_broadcast_stop());
  }
}
