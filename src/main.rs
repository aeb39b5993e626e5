//! freedccd Implementierung
//! Lizenz: LGPL V3
//!
//! DCC (NMRA) Kommandostation: Kommandos von der seriellen Konsole werden
//! als DCC Pakete laufend auf die Gleisleitung moduliert.

use configparser::ini::Ini;
use log::{error, info, warn};
use nix::{
  libc::{SIGHUP, SIGINT, SIGQUIT, SIGTERM},
  unistd::{fork, ForkResult},
};
use signal_hook::iterator::Signals;
use std::{
  env, fs, process,
  sync::{Arc, Mutex},
  thread,
  time::Duration,
};

mod cs_cache;
mod cs_dcc;
mod cs_dsl;
mod cs_hash;
mod cs_io;
mod cs_scheduler;
mod cs_signal;
mod cs_sys;

use crate::{cs_cache::Cache, cs_io::Console};

/// PID Filename
const PID_FILE: &str = "/var/run/freedccd.pid";

/// Startoptionen der Kommandostation
#[derive(Debug)]
struct StartOptionen {
  /// Configfile, Default /etc/freedccd.conf
  config_file: String,
  /// Ohne -n läuft die Station als Daemon im Hintergrund
  daemon: bool,
  /// Mit -d wird die device Angabe aus dem Configfile übersteuert,
  /// praktisch um die Station ohne Configfile Änderung an einem anderen
  /// seriellen Port zu testen
  device: Option<String>,
}

impl StartOptionen {
  /// Aufrufhilfe
  fn usage() -> String {
    format!(
      "Aufruf: {} [-n] [-f configfile] [-d device]\n\
       -n Kein fork(), im Vordergrund bleiben\n\
       -f configfile Zu verwendendes Configfile\n\
       -d device Serielle Konsole, übersteuert das Configfile",
      env!("CARGO_PKG_NAME")
    )
  }

  /// Liest die Startoptionen aus den Kommandozeilenargumenten.
  /// Err enthält den Grund, bei -? ist er leer (nur Hilfetext verlangt).
  /// # Arguments
  /// * args - Kommandozeilenargumente ohne den Programmpfad
  fn from_args(args: &[String]) -> Result<StartOptionen, String> {
    let mut optionen = StartOptionen {
      config_file: format!("/etc/{}.conf", env!("CARGO_PKG_NAME")),
      daemon: true,
      device: None,
    };
    let mut args = args.iter();
    while let Some(arg) = args.next() {
      match arg.as_str() {
        "-n" => optionen.daemon = false,
        "-f" => optionen.config_file = args.next().ok_or("-f verlangt ein Configfile")?.clone(),
        "-d" => optionen.device = Some(args.next().ok_or("-d verlangt ein Device")?.clone()),
        "-?" => return Err(String::new()),
        unbekannt => return Err(format!("Option {} ist unbekannt", unbekannt)),
      }
    }
    Ok(optionen)
  }
}

///Main
fn main() {
  env::set_var("RUST_BACKTRACE", "1");
  env::set_var("RUST_LOG", "INFO");
  env_logger::builder().format_timestamp_millis().init();
  let args: Vec<String> = env::args().skip(1).collect();
  if let Err(msg) = start(&args) {
    error!("Start Error: {}", msg);
    process::exit(1);
  }
}

/// Gleis stromlos schalten und PID File löschen wenn das Programm
/// terminiert wird
fn terminate_power_off() {
  let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP, SIGQUIT]).unwrap();
  if signals.forever().next().is_some() {
    cs_signal::track_power_off();
    //Kurze Pause damit der Pegel sicher anliegt
    thread::sleep(Duration::from_millis(200));
    del_pidfile();
    process::exit(0);
  }
}

///PID File schreiben
/// # Arguments
/// * pid - PID des gestarteten Daemons
fn write_pidfile(pid: i32) {
  if fs::write(PID_FILE, pid.to_string()).is_err() {
    warn!("PID File {} konnte nicht geschrieben werden", PID_FILE);
  }
}

///PID File löschen
fn del_pidfile() {
  fs::remove_file(PID_FILE).unwrap_or(());
}

///Start freedccd
/// # Arguments
/// * args - Kommandozeilenargumente ohne den Programmpfad
fn start(args: &[String]) -> Result<(), String> {
  println!(
    "{} V{} DCC Kommandostation",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_VERSION")
  );
  let optionen = match StartOptionen::from_args(args) {
    Ok(optionen) => optionen,
    Err(msg) => {
      if !msg.is_empty() {
        println!("{msg}");
      }
      println!("{}", StartOptionen::usage());
      return Ok(());
    }
  };
  //Als Daemon in den Hintergrund wechseln
  if optionen.daemon {
    match unsafe { fork() }.map_err(|err| format!("fork() fehlgeschlagen: {}", err))? {
      ForkResult::Parent { child } => {
        write_pidfile(child.into());
        return Ok(());
      }
      ForkResult::Child => info!("Daemon gestartet"),
    }
  }
  //Konfiguration lesen, die Kommandozeile übersteuert die device Angabe
  let mut config = Ini::new();
  let alle_abschnitte = config
    .load(&optionen.config_file)
    .map_err(|msg| format!("Configfile {}: {}", optionen.config_file, msg))?;
  let mut station = alle_abschnitte
    .get("station")
    .ok_or("Kein [station] Abschnitt in Konfiguration")?
    .clone();
  if let Some(device) = optionen.device {
    station.insert("device".to_string(), Some(device));
  }

  //Sicherstellung dass das Gleis stromlos und das PID File gelöscht wird
  //wenn das Programm terminiert wird
  thread::Builder::new()
    .name("Cleanup".to_string())
    .spawn(terminate_power_off)
    .unwrap();

  //Subsysteme verdrahten: Modulator <- Scheduler <- Konsole
  let cache = Arc::new(Mutex::new(Cache::new()));
  let signal_tx = cs_signal::start();
  let scheduler_tx = cs_scheduler::start(cache.clone(), signal_tx);
  let mut console = Console::new(&station)?;
  info!("{} bereit", env!("CARGO_PKG_NAME"));

  //Hauptschleife: Konsole lesen, geparste Pakete dem Scheduler übergeben
  loop {
    if let Some(packet) = console.read(&cache) {
      cs_scheduler::add_packet(&scheduler_tx, packet);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn args(liste: &[&str]) -> Vec<String> {
    liste.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn from_args_defaults_test() {
    //Ohne Optionen: Daemon mit Default Configfile, kein Device Override
    let optionen = StartOptionen::from_args(&[]).expect("Keine Optionen müssen gültig sein");
    assert!(optionen.daemon);
    assert_eq!(
      optionen.config_file,
      format!("/etc/{}.conf", env!("CARGO_PKG_NAME"))
    );
    assert_eq!(optionen.device, None);
  }

  #[test]
  fn from_args_alle_optionen_test() {
    let optionen =
      StartOptionen::from_args(&args(&["-n", "-f", "test.conf", "-d", "/dev/ttyUSB1"]))
        .expect("Kombination -n -f -d muss gültig sein");
    assert!(!optionen.daemon);
    assert_eq!(optionen.config_file, "test.conf");
    assert_eq!(optionen.device, Some("/dev/ttyUSB1".to_string()));
  }

  #[test]
  fn from_args_fehler_test() {
    //-f und -d verlangen einen Wert
    assert_eq!(
      StartOptionen::from_args(&args(&["-f"])).unwrap_err(),
      "-f verlangt ein Configfile"
    );
    assert_eq!(
      StartOptionen::from_args(&args(&["-n", "-d"])).unwrap_err(),
      "-d verlangt ein Device"
    );
    //Unbekannte Option wird im Fehlertext genannt
    assert!(StartOptionen::from_args(&args(&["--daemon"]))
      .unwrap_err()
      .contains("--daemon"));
    //-? liefert leeren Err, der Aufrufer gibt nur den Hilfetext aus
    assert_eq!(StartOptionen::from_args(&args(&["-?"])).unwrap_err(), "");
  }
}
