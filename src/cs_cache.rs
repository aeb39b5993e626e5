//! Refresh Cache: letztes Paket pro Lok plus die Reihenfolge der aktiven Loks.
//!
//! DCC Dekoder sind zustandslose Empfänger, jedes Kommando muss deshalb
//! laufend wiederholt werden. Der Cache speichert pro Lokadresse das zuletzt
//! gesendete Paket und liefert die Pakete reihum (Round Robin) zum
//! erneuten Senden an den Scheduler.

use log::warn;

use crate::cs_dcc::DccPacket;
use crate::cs_hash::Hash;

/// Max. Anzahl gleichzeitig aktiver Lokadressen
pub const CACHE_ADDR_SIZE: usize = 20;

pub struct Cache {
  /// FIFO der aktiven Lokadressen, bestimmt die Refresh Reihenfolge
  adressen: Vec<u8>,
  /// Letztes Paket pro Lokadresse
  packets: Hash<DccPacket>,
}

impl Cache {
  /// Neuen, leeren Cache erstellen
  pub fn new() -> Cache {
    Cache {
      adressen: Vec::with_capacity(CACHE_ADDR_SIZE),
      packets: Hash::new(CACHE_ADDR_SIZE),
    }
  }

  /// Beide Strukturen zurücksetzen, alle Pakete werden zerstört
  pub fn clear(&mut self) {
    self.adressen.clear();
    self.packets.reset();
  }

  /// Paket in den Cache übernehmen (der Cache übernimmt das Paket).
  /// Eine noch nicht aktive Adresse kommt ans Ende der Refresh Reihenfolge,
  /// ein vorhandenes Paket derselben Adresse wird ersetzt und zerstört.
  /// # Arguments
  /// * packet - Das zuletzt für diese Lok gesendete Paket
  pub fn update(&mut self, packet: DccPacket) {
    let address = packet.get_address();
    if self.packets.get(address).is_none() {
      if self.adressen.len() >= CACHE_ADDR_SIZE {
        //Mehr aktive Loks als Plätze: Paket verwerfen statt den Hash zu sprengen
        warn!(
          "Cache voll ({} Loks), Paket für Adresse {} wird nicht refresht",
          CACHE_ADDR_SIZE, address
        );
        return;
      }
      self.adressen.push(address);
    }
    self.packets.insert(address, packet);
  }

  /// Liefert das nächste zu refreshende Paket oder None bei leerem Cache.
  /// Die gelieferte Adresse wandert ans Ende der Reihenfolge, so wird jede
  /// aktive Lok genau einmal pro Umlauf refresht. Das Paket bleibt im Cache.
  pub fn get_next(&mut self) -> Option<&DccPacket> {
    if self.adressen.is_empty() {
      return None;
    }
    let address = self.adressen.remove(0);
    self.adressen.push(address);
    self.packets.get(address)
  }

  /// Liefert das Paket zu einer Adresse oder None
  pub fn get(&self, address: u8) -> Option<&DccPacket> {
    self.packets.get(address)
  }

  /// Anzahl aktuell aktiver Loks
  pub fn current_size(&self) -> usize {
    self.adressen.len()
  }

  /// Kapazität des Caches
  pub fn total_size(&self) -> usize {
    CACHE_ADDR_SIZE
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cs_dcc::DccRichtung;

  /// Fertiges Fahrpaket für eine Lok bauen
  fn fahr_paket(adr: u8, step: usize) -> DccPacket {
    let mut packet = DccPacket::baseline();
    packet.set_preamble();
    packet.set_address(adr);
    packet.set_speed_direction_preamble();
    packet.set_direction(DccRichtung::Vorwaerts);
    packet.set_speed(step);
    packet.set_checksum();
    packet.set_packet_end();
    packet
  }

  #[test]
  fn round_robin_test() {
    //Drei Loks: jeder Umlauf muss jede Lok genau einmal liefern
    let mut cache = Cache::new();
    cache.update(fahr_paket(1, 5));
    cache.update(fahr_paket(2, 5));
    cache.update(fahr_paket(3, 5));
    assert_eq!(cache.current_size(), 3);
    let mut reihenfolge = Vec::new();
    for _ in 0..9 {
      reihenfolge.push(cache.get_next().expect("Cache darf nicht leer sein").get_address());
    }
    assert_eq!(reihenfolge, vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);
  }

  #[test]
  fn update_ersetzt_test() {
    //Update derselben Adresse ersetzt das Paket ohne die Reihenfolge zu verändern
    let mut cache = Cache::new();
    cache.update(fahr_paket(1, 5));
    cache.update(fahr_paket(2, 5));
    cache.update(fahr_paket(1, 12));
    assert_eq!(cache.current_size(), 2);
    assert_eq!(
      cache.get(1).expect("Paket für Lok 1 muss vorhanden sein").get_speed_step(),
      12
    );
    assert_eq!(cache.get_next().unwrap().get_address(), 1);
    assert_eq!(cache.get_next().unwrap().get_address(), 2);
  }

  #[test]
  fn clear_test() {
    let mut cache = Cache::new();
    cache.update(fahr_paket(1, 5));
    cache.clear();
    assert_eq!(cache.current_size(), 0);
    assert!(cache.get_next().is_none());
    assert!(cache.get(1).is_none());
  }

  #[test]
  fn leerer_cache_test() {
    let mut cache = Cache::new();
    assert!(cache.get_next().is_none());
    assert!(cache.get(7).is_none());
  }

  #[test]
  fn cache_voll_test() {
    //Die 21. Lok hat keinen Platz mehr und wird verworfen
    let mut cache = Cache::new();
    for adr in 1..=(CACHE_ADDR_SIZE as u8) {
      cache.update(fahr_paket(adr, 5));
    }
    cache.update(fahr_paket(100, 5));
    assert_eq!(cache.current_size(), CACHE_ADDR_SIZE);
    assert!(cache.get(100).is_none());
  }
}
