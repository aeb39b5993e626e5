//! DCC Basispaket Kodierung gemäss NMRA S-9.2
//!
//! Ein Basispaket ist 5 Bytes lang: Preamble, 7 Bit Lokadresse,
//! Fahrbefehl (Richtung + Fahrstufe), XOR Prüfsumme, Endbit.
//! Die Felder liegen quer über die Bytegrenzen, deshalb die Masken unten.

use std::cmp::Ordering;

/// Lokadressraum, Adressen werden modulo diesem Wert reduziert. Adresse 0 ist Broadcast.
pub const DCC_ADDRESS_MAX: u8 = 128;
/// Anzahl Fahrstufen inkl. Stufe 0 (= Halt)
pub const DCC_MAX_SPEED_STEPS: usize = 29;
/// Länge eines Basispaketes in Bytes
pub const DCC_BASELINE_LEN: usize = 5;

//Die nachgestellte Zahl bezeichnet das Byte (ab 0) auf das sich die Maske bezieht.
//Die Maske erhält die fremden Bits, die eigenen werden vor dem Setzen gelöscht.
const DCC_MASK_PREAMBLE_0: u8 = 0x00;
const DCC_MASK_PREAMBLE_1: u8 = 0x0F;
const DCC_MASK_ADDRESS_1: u8 = 0xFC;
const DCC_MASK_ADDRESS_2: u8 = 0x07;
const DCC_MASK_SD_PREAMBLE_2: u8 = 0xFC;
const DCC_MASK_DIRECTION_3: u8 = 0x7F;
const DCC_MASK_SPEED_3: u8 = 0x83;
const DCC_MASK_CHECKSUM_3: u8 = 0xFE;
const DCC_MASK_CHECKSUM_4: u8 = 0x01;

/// Kodierungstabelle der Fahrstufen 0..28.
/// Eintrag i ist der 5 Bit Code der Fahrstufe i im Basispaket
/// (Bit 0 des Codes ist das niederwertige "halbe Stufen" Bit C gemäss NMRA).
const DCC_SPEED_STEPS: [u8; DCC_MAX_SPEED_STEPS] = [
  0x00, //Halt
  0x02, 0x12, 0x03, 0x13, 0x04, 0x14, 0x05, 0x15, //Stufe 1 bis 8
  0x06, 0x16, 0x07, 0x17, 0x08, 0x18, 0x09, 0x19, //Stufe 9 bis 16
  0x0A, 0x1A, 0x0B, 0x1B, 0x0C, 0x1C, 0x0D, 0x1D, //Stufe 17 bis 24
  0x0E, 0x1E, 0x0F, 0x1F, //Stufe 25 bis 28
];

/// Lok Fahrtrichtung
#[derive(Clone, Debug, PartialEq, Copy)]
pub enum DccRichtung {
  Vorwaerts,
  Rueckwaerts,
}

/// Ein DCC Paket: Bytebuffer fester Grösse.
/// Die set_* Methoden setzen nur die eigenen Bits des jeweiligen Feldes,
/// nach Mutationen muss der Aufrufer vor dem Senden set_checksum aufrufen.
#[derive(Clone, Debug, PartialEq)]
pub struct DccPacket {
  bytes: Vec<u8>,
}

impl DccPacket {
  /// Neues, genulltes Paket mit size Bytes erstellen
  /// # Arguments
  /// * size - Paketlänge in Bytes, muss > 0 sein
  pub fn new(size: usize) -> DccPacket {
    assert!(size > 0, "DCC Paketgrösse muss > 0 sein");
    DccPacket {
      bytes: vec![0; size],
    }
  }

  /// Neues, genulltes Basispaket (5 Bytes) erstellen
  pub fn baseline() -> DccPacket {
    DccPacket::new(DCC_BASELINE_LEN)
  }

  /// Paket aus fertigen Bytes erstellen (raw Kommando)
  pub fn from_bytes(bytes: Vec<u8>) -> DccPacket {
    assert!(!bytes.is_empty(), "DCC Paketgrösse muss > 0 sein");
    DccPacket { bytes }
  }

  /// Paketlänge in Bytes
  pub fn size(&self) -> usize {
    self.bytes.len()
  }

  /// Die rohen Paketbytes, Byte 0 wird zuerst gesendet
  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  /// Preamble setzen: 12 Einsen über Byte 0 und die oberen 4 Bits von Byte 1
  pub fn set_preamble(&mut self) {
    self.bytes[0] &= DCC_MASK_PREAMBLE_0;
    self.bytes[1] &= DCC_MASK_PREAMBLE_1;
    self.bytes[0] |= 0xFF;
    self.bytes[1] |= 0xF0;
  }

  /// Lokadresse setzen. Die Adresse wird modulo 128 reduziert, höhere Bits
  /// werden ohne Fehler maskiert.
  /// # Arguments
  /// * address - Lokadresse, 0 ist Broadcast
  pub fn set_address(&mut self, address: u8) {
    let address = address % DCC_ADDRESS_MAX;
    self.bytes[1] &= DCC_MASK_ADDRESS_1;
    self.bytes[2] &= DCC_MASK_ADDRESS_2;
    //Obere 2 Adressbits in Byte 1, untere 5 in Byte 2
    self.bytes[1] |= address >> 5;
    self.bytes[2] |= address << 3;
  }

  /// Instruktionspreamble 01 für Fahrbefehl (Speed & Direction) setzen
  pub fn set_speed_direction_preamble(&mut self) {
    self.bytes[2] &= DCC_MASK_SD_PREAMBLE_2;
    self.bytes[2] |= 0x01;
  }

  /// Fahrtrichtung setzen
  pub fn set_direction(&mut self, richtung: DccRichtung) {
    self.bytes[3] &= DCC_MASK_DIRECTION_3;
    if richtung == DccRichtung::Vorwaerts {
      self.bytes[3] |= 0x80;
    }
  }

  /// Fahrstufe setzen. Die Stufe wird modulo 29 reduziert und über die
  /// Kodierungstabelle in den 5 Bit Code übersetzt.
  /// # Arguments
  /// * step - Fahrstufe 0 (= Halt) bis 28
  pub fn set_speed(&mut self, step: usize) {
    let step = step % DCC_MAX_SPEED_STEPS;
    self.bytes[3] &= DCC_MASK_SPEED_3;
    //Der Code beginnt bei Bit 2
    self.bytes[3] |= DCC_SPEED_STEPS[step] << 2;
  }

  /// Prüfsumme neu berechnen und setzen: XOR von Adressbyte und Fahrbefehlsbyte.
  /// Muss nach jeder Feldmutation und vor dem Senden aufgerufen werden.
  pub fn set_checksum(&mut self) {
    let checksum = self.get_address() ^ self.get_speed_and_direction();
    self.bytes[3] &= DCC_MASK_CHECKSUM_3;
    self.bytes[4] &= DCC_MASK_CHECKSUM_4;
    //MSB der Prüfsumme ins Byte 3, der Rest nach Byte 4
    self.bytes[3] |= checksum >> 7;
    self.bytes[4] |= checksum << 1;
  }

  /// Paketendbit setzen
  pub fn set_packet_end(&mut self) {
    self.bytes[4] |= 0x01;
  }

  /// Liefert die Lokadresse des Paketes
  pub fn get_address(&self) -> u8 {
    let mut address = (self.bytes[1] & !DCC_MASK_ADDRESS_1) << 5;
    address |= (self.bytes[2] & !DCC_MASK_ADDRESS_2) >> 3;
    address
  }

  /// Liefert das Fahrbefehlsbyte (01DCSSSS) wie es in die Prüfsumme eingeht
  pub fn get_speed_and_direction(&self) -> u8 {
    let mut speed = 0x40 | ((self.bytes[3] & !DCC_MASK_DIRECTION_3) >> 2);
    speed |= (self.bytes[3] & !DCC_MASK_SPEED_3) >> 2;
    speed
  }

  /// Liefert die Fahrstufe des Paketes, 0 wenn der Code nicht in der Tabelle ist
  pub fn get_speed_step(&self) -> usize {
    let code = (self.bytes[3] & !DCC_MASK_SPEED_3) >> 2;
    DCC_SPEED_STEPS
      .iter()
      .position(|&step| step == code)
      .unwrap_or(0)
  }

  /// Liefert die Fahrtrichtung des Paketes
  pub fn get_direction(&self) -> DccRichtung {
    if (self.bytes[3] & !DCC_MASK_DIRECTION_3) != 0 {
      DccRichtung::Vorwaerts
    } else {
      DccRichtung::Rueckwaerts
    }
  }

  /// Vergleicht die Fahrstufen (nicht die rohen Codes) zweier Pakete.
  /// Gleiche Stufen sind gleich, unabhängig von Richtung und Adresse.
  #[allow(dead_code)]
  pub fn cmp_speed(&self, other: &DccPacket) -> Ordering {
    self.get_speed_step().cmp(&other.get_speed_step())
  }

  /// Reset Spezialpaket für alle Loks
  #[allow(dead_code)]
  pub fn special_reset(&mut self) {
    self.bytes[0] = 0xFF;
    self.bytes[1] = 0xF0;
    self.bytes[2] = 0x00;
    self.bytes[3] = 0x00;
    self.bytes[4] = 0x01;
  }

  /// Idle Spezialpaket für alle Dekoder
  pub fn special_idle(&mut self) {
    self.bytes[0] = 0xFF;
    self.bytes[1] = 0xF7;
    self.bytes[2] = 0xF8;
    self.bytes[3] = 0x01;
    self.bytes[4] = 0xFF;
  }

  /// Broadcast Stop Spezialpaket: alle Loks halten, Motoren bleiben versorgt
  pub fn special_broadcast_stop(&mut self) {
    self.bytes[0] = 0xFF;
    self.bytes[1] = 0xF0;
    self.bytes[2] = 0x01;
    self.bytes[3] = 0xC0;
    self.bytes[4] = 0xE1;
  }

  /// Nothalt Spezialpaket: Dekoder nehmen die Motorspannung weg
  pub fn special_emergency_stop(&mut self) {
    self.bytes[0] = 0xFF;
    self.bytes[1] = 0xF0;
    self.bytes[2] = 0x01;
    self.bytes[3] = 0xC4;
    self.bytes[4] = 0xE3;
  }

  /// Prüft ob das Paket ein Broadcast Stop (inkl. Nothalt) ist
  pub fn is_broadcast_stop(&self) -> bool {
    self.size() == DCC_BASELINE_LEN
      && self.bytes[0] == 0xFF
      && self.bytes[1] == 0xF0
      && self.bytes[2] == 0x01
      && (self.bytes[3] == 0xC0 || self.bytes[3] == 0xC4)
      && (self.bytes[4] == 0xE1 || self.bytes[4] == 0xE3)
  }

  /// Binärdarstellung des Paketes, Bytes mit Leerzeichen getrennt
  pub fn dump(&self) -> String {
    let mut dump = String::with_capacity(self.size() * 9);
    for (i, byte) in self.bytes.iter().enumerate() {
      if i > 0 {
        dump.push(' ');
      }
      for bit in (0..8).rev() {
        dump.push(if byte & (1 << bit) != 0 { '1' } else { '0' });
      }
    }
    dump
  }

  /// Hexdarstellung des Paketes, Bytes mit Leerzeichen getrennt
  pub fn hex_dump(&self) -> String {
    let mut dump = String::with_capacity(self.size() * 3);
    for (i, byte) in self.bytes.iter().enumerate() {
      if i > 0 {
        dump.push(' ');
      }
      dump.push_str(format!("{:02x}", byte).as_str());
    }
    dump
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Baut ein fertiges Fahrpaket wie es der Parser erzeugt
  fn fahr_paket(adr: u8, step: usize, richtung: DccRichtung) -> DccPacket {
    let mut packet = DccPacket::baseline();
    packet.set_preamble();
    packet.set_address(adr);
    packet.set_speed_direction_preamble();
    packet.set_direction(richtung);
    packet.set_speed(step);
    packet.set_checksum();
    packet.set_packet_end();
    packet
  }

  /// Die Prüfsumme aus den Paketbits extrahieren
  fn checksum_byte(packet: &DccPacket) -> u8 {
    ((packet.bytes()[3] & 0x01) << 7) | (packet.bytes()[4] >> 1)
  }

  #[test]
  fn roundtrip_alle_felder_test() {
    //Alle Kombinationen von Adresse, Fahrstufe und Richtung müssen
    //verlustfrei wieder auslesbar sein und die Prüfsummenrelation erfüllen
    for adr in 0..DCC_ADDRESS_MAX {
      for step in 0..DCC_MAX_SPEED_STEPS {
        for richtung in [DccRichtung::Vorwaerts, DccRichtung::Rueckwaerts] {
          let packet = fahr_paket(adr, step, richtung);
          assert_eq!(packet.get_address(), adr);
          assert_eq!(packet.get_speed_step(), step);
          assert_eq!(packet.get_direction(), richtung);
          assert_eq!(
            checksum_byte(&packet),
            packet.get_address() ^ packet.get_speed_and_direction(),
            "Prüfsummenrelation verletzt adr={} step={}",
            adr,
            step
          );
          //Endbit muss immer gesetzt sein
          assert_eq!(packet.bytes()[4] & 0x01, 0x01);
        }
      }
    }
  }

  #[test]
  fn fahr_paket_bytes_test() {
    //forward addr 3 speed 8: Stufe 8 kodiert als 0x15, Richtung vorwärts
    let packet = fahr_paket(3, 8, DccRichtung::Vorwaerts);
    assert_eq!(packet.bytes(), &[0xFF, 0xF0, 0x19, 0xD4, 0xED]);
  }

  #[test]
  fn adresse_speed_modulo_test() {
    //Adresse wird modulo 128, Fahrstufe modulo 29 reduziert, kein Fehler
    let mut packet = DccPacket::baseline();
    packet.set_address(130);
    assert_eq!(packet.get_address(), 2);
    packet.set_speed(30);
    assert_eq!(packet.get_speed_step(), 1);
  }

  #[test]
  fn spezial_pakete_test() {
    let mut reset = DccPacket::baseline();
    reset.special_reset();
    assert_eq!(reset.bytes(), &[0xFF, 0xF0, 0x00, 0x00, 0x01]);

    let mut idle = DccPacket::baseline();
    idle.special_idle();
    assert_eq!(idle.bytes(), &[0xFF, 0xF7, 0xF8, 0x01, 0xFF]);

    let mut stop = DccPacket::baseline();
    stop.special_broadcast_stop();
    assert_eq!(stop.bytes(), &[0xFF, 0xF0, 0x01, 0xC0, 0xE1]);

    let mut nothalt = DccPacket::baseline();
    nothalt.special_emergency_stop();
    assert_eq!(nothalt.bytes(), &[0xFF, 0xF0, 0x01, 0xC4, 0xE3]);

    //Beide Stop Varianten werden erkannt, Idle und Fahrpakete nicht
    assert!(stop.is_broadcast_stop());
    assert!(nothalt.is_broadcast_stop());
    assert!(!idle.is_broadcast_stop());
    assert!(!fahr_paket(3, 8, DccRichtung::Vorwaerts).is_broadcast_stop());
    //Andere Paketlänge ist nie ein Broadcast Stop
    assert!(!DccPacket::from_bytes(vec![0xFF, 0xF0, 0x01, 0xC0]).is_broadcast_stop());
  }

  #[test]
  fn cmp_speed_test() {
    let langsam = fahr_paket(3, 5, DccRichtung::Vorwaerts);
    let schnell = fahr_paket(7, 20, DccRichtung::Rueckwaerts);
    let auch_langsam = fahr_paket(9, 5, DccRichtung::Rueckwaerts);
    assert_eq!(langsam.cmp_speed(&schnell), Ordering::Less);
    assert_eq!(schnell.cmp_speed(&langsam), Ordering::Greater);
    //Gleiche Stufe ist gleich, Richtung und Adresse spielen keine Rolle
    assert_eq!(langsam.cmp_speed(&auch_langsam), Ordering::Equal);
  }

  #[test]
  fn dump_test() {
    let mut packet = DccPacket::baseline();
    packet.special_broadcast_stop();
    assert_eq!(packet.hex_dump(), "ff f0 01 c0 e1");
    assert_eq!(
      packet.dump(),
      "11111111 11110000 00000001 11000000 11100001"
    );
  }

  #[test]
  #[should_panic(expected = "DCC Paketgrösse muss > 0 sein")]
  fn leeres_paket_test() {
    DccPacket::new(0);
  }
}
