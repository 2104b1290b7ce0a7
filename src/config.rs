//! Configuration surface: the flat `pppoe` section key/values plus the
//! `ifname[,k=v[,k=v...]]` per-interface option grammar. No serde/file-format
//! crate is used here: the wire grammar this section implements is an ad hoc,
//! comma/`=`-delimited mini-language, not a structured document format.

use std::fmt;

pub const MAX_SERVICE_NAMES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfnameInSid {
    Off,
    CalledSid,
    CallingSid,
    Both,
}

impl IfnameInSid {
    pub fn in_called(self) -> bool {
        matches!(self, IfnameInSid::CalledSid | IfnameInSid::Both)
    }

    pub fn in_calling(self) -> bool {
        matches!(self, IfnameInSid::CallingSid | IfnameInSid::Both)
    }
}

/// `-1` = never reply, `0` = reply immediately, `>0` = delay in ms, plus an
/// optional staircase keyed by active-session-count thresholds.
#[derive(Debug, Clone)]
pub enum PadoDelay {
    Fixed(i64),
    Staircase(Vec<(u64, i64)>),
}

impl PadoDelay {
    /// Resolves the effective delay in ms given the current active count.
    /// `-1` means never reply, `0` means immediate.
    pub fn resolve(&self, active: u64) -> i64 {
        match self {
            PadoDelay::Fixed(v) => *v,
            PadoDelay::Staircase(steps) => {
                let mut delay = 0;
                for (threshold, d) in steps {
                    if active >= *threshold {
                        delay = *d;
                    }
                }
                delay
            }
        }
    }
}

impl Default for PadoDelay {
    fn default() -> Self {
        PadoDelay::Fixed(0)
    }
}

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub ac_name: String,
    pub service_names: Vec<String>,
    pub reply_exact_service: bool,
    pub ifname_in_sid: IfnameInSid,
    pub pado_delay: PadoDelay,
    pub tr101: bool,
    /// Default per-interface PADI sliding-window limit; overridden per
    /// interface by `padi-limit=N` in that interface's spec string.
    pub padi_limit: u32,
    /// Process-wide PADI cap shared by every interface's admission
    /// window, `0` disables it. Distinct from `padi_limit`, which bounds
    /// one interface's own window.
    pub global_padi_limit: u32,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ac_name: "accel-ppp".to_string(),
            service_names: Vec::new(),
            reply_exact_service: false,
            ifname_in_sid: IfnameInSid::Off,
            pado_delay: PadoDelay::default(),
            tr101: false,
            padi_limit: 0,
            global_padi_limit: 0,
        }
    }
}

/// Options parsed from a single `interface = ifname[,k=v...]` entry,
/// overlaid on the global configuration for that interface.
#[derive(Debug, Clone, Default)]
pub struct InterfaceOptions {
    pub ifname: String,
    pub padi_limit: Option<u32>,
    pub require_service_name: Option<bool>,
    pub service_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid interface option string: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// Parses `ifname[,k=v[,k=v...]]`, honoring quoted values so commas/`=` can
/// appear inside a value, e.g. `eth0,service-name="my,isp"`.
pub fn parse_interface_spec(spec: &str) -> Result<InterfaceOptions, ParseError> {
    let mut parts = split_respecting_quotes(spec);
    if parts.is_empty() {
        return Err(ParseError("empty interface spec".to_string()));
    }

    let ifname = parts.remove(0);
    if ifname.is_empty() {
        return Err(ParseError("missing interface name".to_string()));
    }

    let mut opts = InterfaceOptions {
        ifname,
        ..Default::default()
    };

    for part in parts {
        let (key, value) = match part.split_once('=') {
            Some((k, v)) => (k, Some(unquote(v))),
            None => (part.as_str(), None),
        };

        match key {
            "padi-limit" => {
                let v = value.ok_or_else(|| ParseError("padi-limit requires a value".into()))?;
                let n: u32 = v
                    .parse()
                    .map_err(|_| ParseError(format!("invalid padi-limit: {v}")))?;
                opts.padi_limit = Some(n);
            }
            "require-service-name" | "require-sn" => {
                let on = match value {
                    None => true,
                    Some(v) => v != "0",
                };
                opts.require_service_name = Some(on);
            }
            "service-name" => {
                let v = value
                    .ok_or_else(|| ParseError("service-name requires a value".into()))?;
                opts.service_names.push(v);
            }
            other => return Err(ParseError(format!("unknown interface option: {other}"))),
        }
    }

    Ok(opts)
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn split_respecting_quotes(spec: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;

    for c in spec.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    parts.push(cur);
    parts
}

/// Parses a `pado-delay` config value: either a bare integer, or a
/// staircase `n1:d1,n2:d2,...` keyed by active-session thresholds.
pub fn parse_pado_delay(s: &str) -> Result<PadoDelay, ParseError> {
    if !s.contains(':') {
        let v: i64 = s
            .parse()
            .map_err(|_| ParseError(format!("invalid pado-delay: {s}")))?;
        return Ok(PadoDelay::Fixed(v));
    }

    let mut steps = Vec::new();
    for entry in s.split(',') {
        let (n, d) = entry
            .split_once(':')
            .ok_or_else(|| ParseError(format!("invalid staircase entry: {entry}")))?;
        let n: u64 = n
            .parse()
            .map_err(|_| ParseError(format!("invalid staircase threshold: {n}")))?;
        let d: i64 = d
            .parse()
            .map_err(|_| ParseError(format!("invalid staircase delay: {d}")))?;
        steps.push((n, d));
    }
    steps.sort_by_key(|(n, _)| *n);
    Ok(PadoDelay::Staircase(steps))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ifname() {
        let opts = parse_interface_spec("eth0").unwrap();
        assert_eq!(opts.ifname, "eth0");
        assert!(opts.padi_limit.is_none());
    }

    #[test]
    fn parses_options_and_flags() {
        let opts = parse_interface_spec("eth0,padi-limit=5,require-sn").unwrap();
        assert_eq!(opts.ifname, "eth0");
        assert_eq!(opts.padi_limit, Some(5));
        assert_eq!(opts.require_service_name, Some(true));
    }

    #[test]
    fn parses_quoted_service_name_with_comma() {
        let opts = parse_interface_spec(r#"eth0,service-name="isp,a""#).unwrap();
        assert_eq!(opts.service_names, vec!["isp,a".to_string()]);
    }

    #[test]
    fn rejects_unknown_option() {
        assert!(parse_interface_spec("eth0,bogus=1").is_err());
    }

    #[test]
    fn staircase_resolves_highest_matching_threshold() {
        let delay = parse_pado_delay("0:0,10:100,50:500").unwrap();
        assert_eq!(delay.resolve(0), 0);
        assert_eq!(delay.resolve(9), 0);
        assert_eq!(delay.resolve(10), 100);
        assert_eq!(delay.resolve(1000), 500);
    }

    #[test]
    fn fixed_delay_parses_negative_never_reply() {
        let delay = parse_pado_delay("-1").unwrap();
        assert_eq!(delay.resolve(0), -1);
    }
}
