use crate::stats::RpcStats;

/// What to print when details are requested without being enabled first.
const DETAILS_NOT_ENABLED: &str =
    "<details not enabled: use rpcs-enable-details to enable>";

/// A read-only diagnostics surface for operational tooling.
///
/// Handlers turn probe keys into `key -> text` pairs; the pairs keep their
/// insertion order. How the keys arrive and where the text goes is the
/// tooling's business.
pub trait ProbeHandler: Send + Sync {
    fn handle_probe(&self, keys: &[&str]) -> Vec<(String, String)>;

    fn supported_keys(&self) -> &'static [&'static str];
}

/// The dispatcher's probe handler, exposing and controlling its
/// [`RpcStats`].
pub struct RpcProbeHandler {
    stats: RpcStats,
}

impl RpcProbeHandler {
    pub(crate) fn new(stats: RpcStats) -> Self {
        Self { stats }
    }
}

impl ProbeHandler for RpcProbeHandler {
    fn handle_probe(&self, keys: &[&str]) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for key in keys {
            match *key {
                "rpcs" => {
                    out.push((
                        "sync unicast rpcs".to_string(),
                        self.stats.unicasts(true).to_string(),
                    ));
                    out.push((
                        "sync multicast rpcs".to_string(),
                        self.stats.multicasts(true).to_string(),
                    ));
                    out.push((
                        "async unicast rpcs".to_string(),
                        self.stats.unicasts(false).to_string(),
                    ));
                    out.push((
                        "async multicast rpcs".to_string(),
                        self.stats.multicasts(false).to_string(),
                    ));
                    out.push((
                        "sync anycast rpcs".to_string(),
                        self.stats.anycasts(true).to_string(),
                    ));
                    out.push((
                        "async anycast rpcs".to_string(),
                        self.stats.anycasts(false).to_string(),
                    ));
                },
                "rpcs-reset" => self.stats.reset(),
                "rpcs-enable-details" => self.stats.set_extended_stats(true),
                "rpcs-disable-details" => self.stats.set_extended_stats(false),
                "rpcs-details" => {
                    let text = if self.stats.extended_stats() {
                        self.stats.print_order_by_dest()
                    } else {
                        DETAILS_NOT_ENABLED.to_string()
                    };
                    out.push((key.to_string(), text));
                },
                _ => {},
            }
        }
        out
    }

    fn supported_keys(&self) -> &'static [&'static str] {
        &[
            "rpcs",
            "rpcs-reset",
            "rpcs-enable-details",
            "rpcs-disable-details",
            "rpcs-details",
        ]
    }
}
