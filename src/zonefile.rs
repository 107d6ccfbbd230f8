//! Zone master files (RFC1035 §5): the parser accepts `$ORIGIN`, `$TTL`,
//! parenthesized continuation lines, quoted strings, `@`, blank-owner
//! repetition and the RFC3597 unknown-type syntax. The writer produces the
//! shape the transfer client commits to disk: `$ORIGIN` only when the origin
//! changes, owner omitted when repeated, SOA RDATA parenthesized.
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::dname::DomainName;
use crate::error::{DNSError, DNSResult};
use crate::rdata::{name_from_token, RData};
use crate::rfc1035::{QClass, QType, RRClass, RRType, ResourceRecord};
use crate::util::parse_ttl;

// a reasonable default when a file has no $TTL and no explicit TTLs
pub const DEFAULT_TTL: u32 = 3600;

//------------------------------------------------------------------------
// Tokenizer: folds parentheses and comments away and yields one token
// list per logical record
//------------------------------------------------------------------------
struct LogicalLine {
    tokens: Vec<String>,
    // whether the physical line started with whitespace (owner repetition)
    blank_owner: bool,
    line_no: usize,
}

fn tokenize(text: &str) -> DNSResult<Vec<LogicalLine>> {
    let mut lines = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut blank_owner = false;
    let mut line_start = true;
    let mut record_open = false;
    let mut paren_depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    let mut line_no = 1usize;
    let mut record_line = 1usize;
    let mut chars = text.chars().peekable();

    macro_rules! push_token {
        () => {
            if !current.is_empty() || in_quote {
                tokens.push(std::mem::take(&mut current));
            }
        };
    }

    while let Some(c) = chars.next() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }

        match c {
            '\\' if in_quote => {
                escaped = true;
            }
            '"' => {
                if in_quote {
                    // closing quote: the (possibly empty) token ends here
                    tokens.push(std::mem::take(&mut current));
                    in_quote = false;
                } else {
                    push_token!();
                    in_quote = true;
                }
                line_start = false;
            }
            _ if in_quote => {
                if c == '\n' {
                    return Err(DNSError::ZoneFile(format!(
                        "line {}: unterminated quoted string",
                        line_no
                    )));
                }
                current.push(c);
            }
            ';' => {
                // comment runs to the end of the physical line
                push_token!();
                while let Some(&n) = chars.peek() {
                    if n == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '(' => {
                push_token!();
                paren_depth += 1;
                line_start = false;
            }
            ')' => {
                push_token!();
                if paren_depth == 0 {
                    return Err(DNSError::ZoneFile(format!(
                        "line {}: unbalanced parentheses",
                        line_no
                    )));
                }
                paren_depth -= 1;
                line_start = false;
            }
            '\n' => {
                push_token!();
                line_no += 1;
                if paren_depth == 0 {
                    if record_open && !tokens.is_empty() {
                        lines.push(LogicalLine {
                            tokens: std::mem::take(&mut tokens),
                            blank_owner,
                            line_no: record_line,
                        });
                    }
                    tokens.clear();
                    record_open = false;
                    line_start = true;
                }
            }
            ' ' | '\t' | '\r' => {
                push_token!();
                if line_start && paren_depth == 0 && !record_open {
                    blank_owner = true;
                }
                line_start = false;
            }
            _ => {
                if !record_open && paren_depth == 0 {
                    record_open = true;
                    record_line = line_no;
                    if line_start {
                        blank_owner = false;
                    }
                }
                line_start = false;
                current.push(c);
            }
        }
    }

    if in_quote {
        return Err(DNSError::ZoneFile("unterminated quoted string".to_string()));
    }
    if paren_depth != 0 {
        return Err(DNSError::ZoneFile("unbalanced parentheses".to_string()));
    }
    push_token!();
    if record_open && !tokens.is_empty() {
        lines.push(LogicalLine {
            tokens,
            blank_owner,
            line_no: record_line,
        });
    }

    Ok(lines)
}

//------------------------------------------------------------------------
// Parser
//------------------------------------------------------------------------
pub fn parse_zone_text(text: &str, origin: &DomainName) -> DNSResult<Vec<ResourceRecord>> {
    let mut records = Vec::new();
    let mut origin = origin.clone();
    let mut default_ttl = DEFAULT_TTL;
    let mut previous_owner: Option<DomainName> = None;

    for line in tokenize(text)? {
        let mut tokens = line.tokens.iter();

        let first = match tokens.next() {
            Some(t) => t.as_str(),
            None => continue,
        };

        // directives
        if first == "$ORIGIN" {
            let name = tokens.next().ok_or_else(|| {
                DNSError::ZoneFile(format!("line {}: $ORIGIN without a name", line.line_no))
            })?;
            origin = name_from_token(name, &origin)?;
            continue;
        }
        if first == "$TTL" {
            let value = tokens.next().ok_or_else(|| {
                DNSError::ZoneFile(format!("line {}: $TTL without a value", line.line_no))
            })?;
            default_ttl = parse_ttl(value)?;
            continue;
        }
        if first.starts_with('$') {
            return Err(DNSError::ZoneFile(format!(
                "line {}: unknown directive {}",
                line.line_no, first
            )));
        }

        // the owner: repeated from the previous record when the line
        // started blank
        let (owner, mut rest): (DomainName, Vec<&String>) = if line.blank_owner {
            let owner = previous_owner.clone().ok_or_else(|| {
                DNSError::ZoneFile(format!(
                    "line {}: no previous owner to repeat",
                    line.line_no
                ))
            })?;
            let mut rest = vec![];
            rest.push(&line.tokens[0]);
            rest.extend(tokens.map(|t| t));
            (owner, rest)
        } else {
            (name_from_token(first, &origin)?, tokens.collect())
        };

        // [ttl] [class] or [class] [ttl] before the type mnemonic
        let mut ttl = default_ttl;
        let mut class = RRClass::from(QClass::IN);
        let mut rtype: Option<RRType> = None;

        let mut consumed = 0usize;
        for token in rest.iter().take(3) {
            let token = token.as_str();
            if let Ok(t) = RRType::from_str(token) {
                // class mnemonics are not types, safe to claim it
                rtype = Some(t);
                consumed += 1;
                break;
            }
            if let Ok(c) = RRClass::from_str(token) {
                class = c;
                consumed += 1;
                continue;
            }
            if let Ok(t) = parse_ttl(token) {
                ttl = t;
                consumed += 1;
                continue;
            }
            return Err(DNSError::ZoneFile(format!(
                "line {}: unrecognized field '{}'",
                line.line_no, token
            )));
        }

        let rtype = rtype.ok_or_else(|| {
            DNSError::ZoneFile(format!("line {}: missing record type", line.line_no))
        })?;

        let rdata_tokens: Vec<String> = rest.drain(consumed..).map(|t| t.to_string()).collect();
        let rdata = RData::from_presentation(rtype, &rdata_tokens, &origin).map_err(|e| {
            DNSError::ZoneFile(format!("line {}: {:?}", line.line_no, e))
        })?;

        previous_owner = Some(owner.clone());
        records.push(ResourceRecord {
            name: owner,
            rtype,
            class,
            ttl,
            rdata,
        });
    }

    Ok(records)
}

pub fn parse_zone_file(path: &Path, origin: &DomainName) -> DNSResult<Vec<ResourceRecord>> {
    let text = fs::read_to_string(path)?;
    parse_zone_text(&text, origin)
}

//------------------------------------------------------------------------
// Writer
//------------------------------------------------------------------------
pub struct ZoneFileWriter<W: Write> {
    out: W,
    previous_owner: Option<DomainName>,
    previous_origin: Option<DomainName>,
}

impl<W: Write> ZoneFileWriter<W> {
    pub fn new(out: W) -> Self {
        ZoneFileWriter {
            out,
            previous_owner: None,
            previous_origin: None,
        }
    }

    /// The comment block the transfer client puts on top of a committed
    /// zone file.
    pub fn write_transfer_header(
        &mut self,
        zone: &DomainName,
        last_serial: Option<u32>,
        master: &str,
        now: u64,
        tsig_key: Option<&DomainName>,
    ) -> std::io::Result<()> {
        writeln!(self.out, "; authdns version {}", env!("CARGO_PKG_VERSION"))?;
        match last_serial {
            None => writeln!(self.out, "; zone '{}'   first transfer", zone)?,
            Some(serial) => writeln!(self.out, "; zone '{}'   last serial {}", zone, serial)?,
        }
        writeln!(self.out, "; from {} using AXFR at {}", master, now)?;
        match tsig_key {
            Some(key) => writeln!(self.out, "; TSIG verified with key '{}'", key)?,
            None => writeln!(self.out, "; NOT TSIG verified")?,
        }
        Ok(())
    }

    pub fn write_rr(&mut self, rr: &ResourceRecord) -> std::io::Result<()> {
        let origin = rr.name.origin_of();

        let owner_changed = self
            .previous_owner
            .as_ref()
            .map(|p| *p != rr.name)
            .unwrap_or(true);

        if owner_changed {
            let origin_changed = self
                .previous_origin
                .as_ref()
                .map(|p| *p != origin)
                .unwrap_or(true);
            if origin_changed {
                writeln!(self.out, "$ORIGIN {}", origin)?;
                self.previous_origin = Some(origin.clone());
            }

            // relative owner when possible, which it is by construction
            match rr.name.relative_to(&origin) {
                Some(rel) => write!(self.out, "{}", rel)?,
                None => write!(self.out, "{}", rr.name)?,
            }
            self.previous_owner = Some(rr.name.clone());
        }

        write!(self.out, "\t{}\t{}\t{}", rr.ttl, rr.class, rr.rtype)?;

        // RDATA fields; SOA gets its historical parenthesized layout
        let fields = rr.rdata.presentation_fields();
        let is_soa = rr.rtype == QType::SOA;
        for (i, field) in fields.iter().enumerate() {
            if i == 0 {
                write!(self.out, "\t{}", field)?;
            } else if is_soa && i == 2 {
                write!(self.out, " (\n\t\t{}", field)?;
            } else {
                write!(self.out, " {}", field)?;
            }
        }
        if is_soa {
            write!(self.out, " )")?;
        }
        writeln!(self.out)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdata::{MX, SOA};
    use std::net::Ipv4Addr;

    fn dn(s: &str) -> DomainName {
        DomainName::try_from(s).unwrap()
    }

    const SAMPLE: &str = r#"
$ORIGIN example.com.
$TTL 3600
@	IN	SOA	ns1 hostmaster (
		2024010101 ; serial
		7200       ; refresh
		3600       ; retry
		1209600    ; expire
		300 )      ; minimum
	IN	NS	ns1
ns1	300	IN	A	192.0.2.1
www		IN	A	192.0.2.10
	IN	TXT	"hello world" "second string"
mail	IN	MX	10 mail
*.wild	IN	A	192.0.2.5
raw	IN	TYPE65280	\# 4 0a000001
"#;

    #[test]
    fn parses_sample_zone() {
        let records = parse_zone_text(SAMPLE, &dn(".")).unwrap();
        assert_eq!(records.len(), 8);

        let soa = &records[0];
        assert_eq!(soa.name, dn("example.com"));
        assert!(soa.rtype == QType::SOA);
        match &soa.rdata {
            RData::SOA(SOA { serial, minimum, mname, .. }) => {
                assert_eq!(*serial, 2024010101);
                assert_eq!(*minimum, 300);
                assert_eq!(*mname, dn("ns1.example.com"));
            }
            other => panic!("unexpected rdata {:?}", other),
        }

        // blank owner repeats the previous one
        let ns = &records[1];
        assert_eq!(ns.name, dn("example.com"));
        assert!(ns.rtype == QType::NS);

        // explicit TTL wins over $TTL
        assert_eq!(records[2].ttl, 300);
        assert_eq!(records[3].ttl, 3600);

        // quoted strings stay intact, spaces included
        let txt = &records[4];
        assert_eq!(txt.name, dn("www.example.com"));
        match &txt.rdata {
            RData::TXT(strings) => {
                assert_eq!(strings.len(), 2);
                assert_eq!(strings[0].0, b"hello world");
            }
            other => panic!("unexpected rdata {:?}", other),
        }

        match &records[5].rdata {
            RData::MX(MX { preference, exchange }) => {
                assert_eq!(*preference, 10);
                assert_eq!(*exchange, dn("mail.example.com"));
            }
            other => panic!("unexpected rdata {:?}", other),
        }

        assert!(records[6].name.is_wildcard());
        assert_eq!(records[7].rdata, RData::Unknown(vec![0x0a, 0, 0, 1]));
    }

    #[test]
    fn writer_output_parses_back() {
        let records = parse_zone_text(SAMPLE, &dn(".")).unwrap();

        let mut writer = ZoneFileWriter::new(Vec::new());
        writer
            .write_transfer_header(&dn("example.com"), Some(2024010100), "192.0.2.53", 0, None)
            .unwrap();
        for rr in &records {
            writer.write_rr(rr).unwrap();
        }
        let text = String::from_utf8(writer.into_inner()).unwrap();

        // the SOA keeps its parenthesized shape
        assert!(text.contains(" (\n"));
        assert!(text.contains("$ORIGIN example.com.\n"));

        let reparsed = parse_zone_text(&text, &dn(".")).unwrap();
        assert_eq!(reparsed.len(), records.len());
        for (a, b) in records.iter().zip(reparsed.iter()) {
            assert_eq!(a.name, b.name, "owner mismatch");
            assert_eq!(a.rtype, b.rtype);
            assert_eq!(a.ttl, b.ttl);
            assert_eq!(a.rdata, b.rdata);
        }
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse_zone_text("www IN A", &dn("example.com")).is_err());
        assert!(parse_zone_text("www IN A 192.0.2.1 (", &dn("example.com")).is_err());
        assert!(parse_zone_text("\tIN A 192.0.2.1", &dn("example.com")).is_err());
    }
}
