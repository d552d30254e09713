use std::sync::OnceLock;

use regex::Regex;

use crate::probe::AppStatus;

/// What a probe reply parsed down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReading {
    pub status: AppStatus,
    pub port20707: bool,
    pub port20773: bool,
}

fn p1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)p1\s*=\s*(true|false)").unwrap())
}

fn p2_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)p2\s*=\s*(true|false)").unwrap())
}

fn flag(re: &Regex, raw: &str) -> Option<bool> {
    re.captures(raw)
        .map(|c| c[1].eq_ignore_ascii_case("true"))
}

/// Scrape the agent's probe output. The command echoes `p1=True|False` for
/// the app port and `p2=True|False` for the sign-in port; anything that
/// matches neither token is Unknown, which is not the same as Offline.
pub fn parse_probe_output(raw: &str) -> ProbeReading {
    let p1 = flag(p1_re(), raw);
    let p2 = flag(p2_re(), raw);

    if p1.is_none() && p2.is_none() {
        return ProbeReading {
            status: AppStatus::Unknown,
            port20707: false,
            port20773: false,
        };
    }

    let port20707 = p1.unwrap_or(false);
    let port20773 = p2.unwrap_or(false);
    let status = if port20707 {
        AppStatus::AppOnline
    } else if port20773 {
        AppStatus::NotSignedIn
    } else {
        AppStatus::Offline
    };

    ProbeReading {
        status,
        port20707,
        port20773,
    }
}
