//! Kommando DSL: handgeschriebener Scanner und rekursiver Abstiegsparser.
//!
//! Der Parser liest die Konsoleneingabe zeichenweise und baut daraus das
//! passende DCC Paket oder ein Systemkommando. Grammatik (Terminale gross):
//!
//! ```text
//! command : raw | help | show | cache
//!         | forward | reverse | stop
//! raw     : RAW HEX
//! help    : HELP
//! show    : SHOW STATUS
//! cache   : CACHE CLEAR
//!         | CACHE SHOW NUMBER
//! forward : FORWARD ( addr speed | speed addr )
//! reverse : REVERSE ( addr speed | speed addr )
//! stop    : STOP addr | STOP ALL | STOP
//! addr    : ADDR NUMBER
//! speed   : SPEED NUMBER
//! ```
//!
//! Ein Kommando endet mit dem Zeilenende. Bei einem Fehler wird der Rest
//! der Eingabe über die flush Schnittstelle verworfen.

use crate::cs_dcc::{DccPacket, DccRichtung};
use crate::cs_sys::SysCmd;

/// Max. Länge eines Tokens in Zeichen
const DSL_MAX_TOK_LEN: usize = 20;

/// Zeichenquelle für den Scanner.
/// Trennt den Parser von der Herkunft der Zeichen (serielle Konsole, Tests).
pub trait DslInput {
  /// Nächstes Zeichen oder None am Streamende
  fn getc(&mut self) -> Option<u8>;
  /// Anstehende Eingabe (Rest der aktuellen Zeile) verwerfen
  fn flush(&mut self);
}

/// Vom Scanner gelieferte Token
#[derive(Debug, PartialEq, Clone)]
enum Token {
  Forward,
  Reverse,
  Stop,
  Addr,
  Speed,
  All,
  Show,
  Status,
  Help,
  Raw,
  Cache,
  Clear,
  Number(u32),
  Hex(String),
  /// Unbekanntes Token, ungültiger Hexstring oder Streamende
  Fehler,
}

/// Parserergebnis: DCC Paket, rohes Paket oder Systemkommando
#[derive(Debug, PartialEq)]
pub enum DslResult {
  Dcc(DccPacket),
  Raw(DccPacket),
  Sys(SysCmd),
}

/// Scanner über der Zeichenquelle mit einem Zeichen Pushback
struct DslScanner<'a> {
  input: &'a mut dyn DslInput,
  pushback: Option<u8>,
  /// Streamende gesehen, alle weiteren Aufrufe liefern Fehler
  seen_end: bool,
}

impl<'a> DslScanner<'a> {
  fn new(input: &'a mut dyn DslInput) -> DslScanner<'a> {
    DslScanner {
      input,
      pushback: None,
      seen_end: false,
    }
  }

  fn getc(&mut self) -> Option<u8> {
    if let Some(c) = self.pushback.take() {
      return Some(c);
    }
    self.input.getc()
  }

  fn ungetc(&mut self, c: u8) {
    self.pushback = Some(c);
  }

  /// Zeichen lesen bis ein Token vollständig ist
  fn next_token(&mut self) -> Token {
    if self.seen_end {
      return Token::Fehler;
    }
    loop {
      let c = match self.getc() {
        Some(c) => c,
        None => {
          self.seen_end = true;
          return Token::Fehler;
        }
      };
      if c == b'0' {
        //0x oder 0X beginnt einen Hexstring
        match self.getc() {
          Some(c2) if c2 == b'x' || c2 == b'X' => return self.scan_hex(),
          Some(c2) => self.ungetc(c2),
          None => self.seen_end = true,
        }
        //Sonst eine Dezimalzahl mit führender Null
        return self.scan_number(c);
      }
      if c.is_ascii_digit() {
        return self.scan_number(c);
      }
      if c.is_ascii_alphabetic() {
        return self.scan_keyword(c);
      }
      match c {
        //Whitespace überspringen
        b' ' | b'\t' => {}
        //Zeilenende beendet das Kommando
        b'\n' => {
          self.seen_end = true;
          return Token::Fehler;
        }
        //Unbekanntes Zeichen
        _ => return Token::Fehler,
      }
    }
  }

  /// Hexstring nach 0x einlesen. Kleinbuchstaben werden zu Grossbuchstaben,
  /// leere und ungerade Längen sind ungültig.
  fn scan_hex(&mut self) -> Token {
    let mut tok = String::new();
    loop {
      match self.getc() {
        Some(c) if c.is_ascii_alphanumeric() => {
          if tok.len() >= DSL_MAX_TOK_LEN {
            //Token zu lang
            return Token::Fehler;
          }
          tok.push((c as char).to_ascii_uppercase());
        }
        Some(c) => {
          self.ungetc(c);
          break;
        }
        None => {
          self.seen_end = true;
          break;
        }
      }
    }
    if tok.is_empty() || tok.len() % 2 != 0 {
      return Token::Fehler;
    }
    Token::Hex(tok)
  }

  /// Dezimalzahl einlesen, der semantische Wert ist die Zahl selbst
  fn scan_number(&mut self, first: u8) -> Token {
    let mut num = (first - b'0') as u32;
    loop {
      match self.getc() {
        Some(c) if c.is_ascii_digit() => {
          num = num.wrapping_mul(10).wrapping_add((c - b'0') as u32);
        }
        Some(c) => {
          self.ungetc(c);
          break;
        }
        None => {
          self.seen_end = true;
          break;
        }
      }
    }
    Token::Number(num)
  }

  /// Schlüsselwort einlesen (kleingeschrieben) und gegen die Tabelle der
  /// reservierten Wörter prüfen
  fn scan_keyword(&mut self, first: u8) -> Token {
    let mut tok = String::new();
    tok.push((first as char).to_ascii_lowercase());
    loop {
      match self.getc() {
        Some(c) if c.is_ascii_alphabetic() => {
          if tok.len() >= DSL_MAX_TOK_LEN {
            self.ungetc(c);
            break;
          }
          tok.push((c as char).to_ascii_lowercase());
        }
        Some(c) => {
          self.ungetc(c);
          break;
        }
        None => {
          self.seen_end = true;
          break;
        }
      }
    }
    match tok.as_str() {
      "raw" => Token::Raw,
      "forward" | "fw" => Token::Forward,
      "reverse" | "rv" => Token::Reverse,
      "stop" => Token::Stop,
      "addr" | "ad" => Token::Addr,
      "speed" | "sp" => Token::Speed,
      "all" => Token::All,
      "show" => Token::Show,
      "cache" => Token::Cache,
      "clear" => Token::Clear,
      "status" => Token::Status,
      "help" => Token::Help,
      //Unbekanntes Schlüsselwort
      _ => Token::Fehler,
    }
  }
}

/// Parserzustand: aktuelles Token plus das im Aufbau befindliche Ergebnis
struct DslParser<'a> {
  scanner: DslScanner<'a>,
  curr: Token,
  /// Bleibt im reinen Syntaxcheck immer None
  result: Option<DslResult>,
  build: bool,
}

/// Startet das Parsen des Eingabestromes bis ein gültiges Kommando gelesen
/// oder ein Syntaxfehler gefunden wurde.
/// Bei einem Fehler wird die Eingabe über flush verworfen, ein teilweise
/// aufgebautes Ergebnis zerstört und Err geliefert.
/// # Arguments
/// * input - Zeichenquelle
/// * build - false: reiner Syntaxcheck, es wird kein Ergebnis aufgebaut
pub fn parser_start(input: &mut dyn DslInput, build: bool) -> Result<Option<DslResult>, String> {
  let mut parser = DslParser {
    scanner: DslScanner::new(input),
    curr: Token::Fehler,
    result: None,
    build,
  };
  //Tokenstream starten
  parser.advance();
  if !parser.parse() {
    parser.scanner.input.flush();
    return Err("Syntaxfehler in Kommando".to_string());
  }
  //DCC Pakete abschliessen
  if let Some(DslResult::Dcc(packet)) = &mut parser.result {
    packet.set_checksum();
    packet.set_packet_end();
  }
  Ok(parser.result)
}

impl<'a> DslParser<'a> {
  /// Tokenstream um ein Token weiterschalten
  fn advance(&mut self) {
    self.curr = self.scanner.next_token();
  }

  /// Aktuelles Token gegen tok prüfen, bei Treffer weiterschalten
  fn accept(&mut self, tok: &Token) -> bool {
    if self.curr == *tok {
      self.advance();
      return true;
    }
    false
  }

  /// Zahltoken akzeptieren und dessen Wert liefern
  fn accept_number(&mut self) -> Option<u32> {
    if let Token::Number(num) = self.curr {
      self.advance();
      return Some(num);
    }
    None
  }

  /// Hextoken akzeptieren und dessen Wert liefern
  fn accept_hex(&mut self) -> Option<String> {
    if let Token::Hex(hex) = &self.curr {
      let hex = hex.clone();
      self.advance();
      return Some(hex);
    }
    None
  }

  /// Die erste Produktion die ihr Starttoken akzeptiert gewinnt
  fn parse(&mut self) -> bool {
    self.grammar_raw()
      || self.grammar_help()
      || self.grammar_show()
      || self.grammar_cache()
      || self.grammar_forward()
      || self.grammar_reverse()
      || self.grammar_stop()
  }

  fn grammar_help(&mut self) -> bool {
    if !self.accept(&Token::Help) {
      return false;
    }
    if self.build {
      self.result = Some(DslResult::Sys(SysCmd::Help));
    }
    true
  }

  fn grammar_show(&mut self) -> bool {
    if !self.accept(&Token::Show) {
      return false;
    }
    if !self.accept(&Token::Status) {
      return false;
    }
    if self.build {
      self.result = Some(DslResult::Sys(SysCmd::Status));
    }
    true
  }

  fn grammar_cache(&mut self) -> bool {
    if !self.accept(&Token::Cache) {
      return false;
    }
    if self.accept(&Token::Clear) {
      if self.build {
        self.result = Some(DslResult::Sys(SysCmd::CacheClear));
      }
      return true;
    }
    if self.accept(&Token::Show) {
      //Nach cache show ist die Lokadresse zwingend
      return match self.accept_number() {
        Some(address) => {
          if self.build {
            self.result = Some(DslResult::Sys(SysCmd::CacheShow { address }));
          }
          true
        }
        None => false,
      };
    }
    false
  }

  fn grammar_forward(&mut self) -> bool {
    if !self.accept(&Token::Forward) {
      return false;
    }
    //Paket vor der restlichen Syntaxprüfung aufsetzen, die addr/speed
    //Produktionen schreiben direkt hinein
    if self.build {
      self.result = Some(DslResult::Dcc(DccPacket::baseline()));
    }
    //Beide Argumentreihenfolgen sind erlaubt, Adresse und Speed sind Pflicht
    if (self.grammar_addr() && self.grammar_speed())
      || (self.grammar_speed() && self.grammar_addr())
    {
      if let Some(DslResult::Dcc(packet)) = &mut self.result {
        packet.set_preamble();
        packet.set_speed_direction_preamble();
        packet.set_direction(DccRichtung::Vorwaerts);
      }
      return true;
    }
    false
  }

  fn grammar_reverse(&mut self) -> bool {
    if !self.accept(&Token::Reverse) {
      return false;
    }
    if self.build {
      self.result = Some(DslResult::Dcc(DccPacket::baseline()));
    }
    if (self.grammar_addr() && self.grammar_speed())
      || (self.grammar_speed() && self.grammar_addr())
    {
      if let Some(DslResult::Dcc(packet)) = &mut self.result {
        packet.set_preamble();
        packet.set_speed_direction_preamble();
        packet.set_direction(DccRichtung::Rueckwaerts);
      }
      return true;
    }
    false
  }

  fn grammar_stop(&mut self) -> bool {
    if !self.accept(&Token::Stop) {
      return false;
    }
    if self.build {
      let mut packet = DccPacket::baseline();
      packet.set_preamble();
      self.result = Some(DslResult::Dcc(packet));
    }
    //Die Adresse ist optional
    if self.grammar_addr() {
      //Halt für eine einzelne Lok: Fahrstufe 0
      if let Some(DslResult::Dcc(packet)) = &mut self.result {
        packet.set_speed_direction_preamble();
        packet.set_speed(0);
      }
    } else if self.accept(&Token::All) {
      //Nothalt: Dekoder nehmen die Motorspannung weg
      if let Some(DslResult::Dcc(packet)) = &mut self.result {
        packet.special_emergency_stop();
      }
    } else {
      //Broadcast Stop, Motoren bleiben versorgt
      if let Some(DslResult::Dcc(packet)) = &mut self.result {
        packet.special_broadcast_stop();
      }
    }
    true
  }

  fn grammar_addr(&mut self) -> bool {
    if !self.accept(&Token::Addr) {
      return false;
    }
    match self.accept_number() {
      Some(num) => {
        if let Some(DslResult::Dcc(packet)) = &mut self.result {
          packet.set_address(num as u8);
        }
        true
      }
      None => false,
    }
  }

  fn grammar_speed(&mut self) -> bool {
    if !self.accept(&Token::Speed) {
      return false;
    }
    match self.accept_number() {
      Some(num) => {
        if let Some(DslResult::Dcc(packet)) = &mut self.result {
          packet.set_speed((num as u8) as usize);
        }
        true
      }
      None => false,
    }
  }

  fn grammar_raw(&mut self) -> bool {
    if !self.accept(&Token::Raw) {
      return false;
    }
    match self.accept_hex() {
      Some(hex) => {
        //Der Scanner akzeptiert auch Buchstaben ausserhalb A-F, hier prüfen
        if !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
          return false;
        }
        if self.build {
          //Hexstring paarweise in Bytes übersetzen, ohne Preamble und
          //ohne Prüfsummenkorrektur
          let bytes = (0..hex.len() / 2)
            .map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap_or(0))
            .collect();
          self.result = Some(DslResult::Raw(DccPacket::from_bytes(bytes)));
        }
        true
      }
      None => false,
    }
  }
}
