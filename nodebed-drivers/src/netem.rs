//! `tc netem` arguments for the docker driver's shaping attributes.
//!
//! The container needs `tc` (iproute2) and `CAP_NET_ADMIN`.

use nodebed_core::{NodeError, NodeResult};

/// Current traffic-shaping settings of one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shaping {
    /// Added delay, ms.
    pub latency_ms: Option<u64>,
    /// Delay variation, ms. Ignored without latency.
    pub jitter_ms: Option<u64>,
    /// Loss in percent.
    pub loss_percent: Option<f32>,
    /// Rate cap, kbit/s.
    pub rate_kbit: Option<u64>,
    /// Interface carrying the qdisc.
    pub interface: String,
}

impl Shaping {
    /// No shaping on `eth0`.
    pub fn new() -> Self {
        Self {
            interface: "eth0".into(),
            ..Default::default()
        }
    }

    /// Returns true if no knob is set.
    pub fn is_empty(&self) -> bool {
        self.latency_ms.is_none() && self.loss_percent.is_none() && self.rate_kbit.is_none()
    }

    /// Full `tc` argv installing the current settings, replacing any
    /// existing root qdisc. Clears the qdisc when nothing is set.
    pub fn tc_command(&self) -> Vec<String> {
        let mut cmd = vec!["tc".to_string()];
        if self.is_empty() {
            cmd.extend(self.to_tc_del_args());
        } else {
            cmd.extend(self.to_tc_replace_args());
        }
        cmd
    }

    /// `qdisc replace dev <iface> root netem <params>`.
    pub fn to_tc_replace_args(&self) -> Vec<String> {
        let mut args = vec![
            "qdisc".into(),
            "replace".into(),
            "dev".into(),
            self.interface.clone(),
            "root".into(),
            "netem".into(),
        ];

        if let Some(delay) = self.latency_ms {
            args.push("delay".into());
            args.push(format!("{}ms", delay));

            if let Some(jitter) = self.jitter_ms {
                args.push(format!("{}ms", jitter));
            }
        }

        if let Some(loss) = self.loss_percent {
            args.push("loss".into());
            args.push(format!("{:.1}%", loss));
        }

        if let Some(rate) = self.rate_kbit {
            args.push("rate".into());
            args.push(format!("{}kbit", rate));
        }

        args
    }

    /// `qdisc del dev <iface> root`.
    pub fn to_tc_del_args(&self) -> Vec<String> {
        vec![
            "qdisc".into(),
            "del".into(),
            "dev".into(),
            self.interface.clone(),
            "root".into(),
        ]
    }
}

/// Parse `50`, `50ms` or `2s` into milliseconds. Empty or `0` clears.
pub fn parse_millis(attr: &str, value: &str) -> NodeResult<Option<u64>> {
    let value = value.trim();
    let invalid = || NodeError::InvalidAttrValue {
        attr: attr.to_string(),
        value: value.to_string(),
    };

    if value.is_empty() {
        return Ok(None);
    }
    let ms = if let Some(n) = value.strip_suffix("ms") {
        n.trim().parse::<u64>().map_err(|_| invalid())?
    } else if let Some(n) = value.strip_suffix('s') {
        n.trim()
            .parse::<u64>()
            .map_err(|_| invalid())?
            .checked_mul(1000)
            .ok_or_else(invalid)?
    } else {
        value.parse::<u64>().map_err(|_| invalid())?
    };

    Ok((ms > 0).then_some(ms))
}

/// Parse `5`, `5%` or `0.5` into a loss percentage.
pub fn parse_percent(attr: &str, value: &str) -> NodeResult<Option<f32>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    let pct: f32 = value
        .trim_end_matches('%')
        .parse()
        .map_err(|_| NodeError::InvalidAttrValue {
            attr: attr.to_string(),
            value: value.to_string(),
        })?;
    if !(0.0..=100.0).contains(&pct) {
        return Err(NodeError::InvalidAttrValue {
            attr: attr.to_string(),
            value: value.to_string(),
        });
    }
    Ok((pct > 0.0).then_some(pct))
}

/// Parse `500`, `500kbit` or `2mbit` into kbit/s.
pub fn parse_kbit(attr: &str, value: &str) -> NodeResult<Option<u64>> {
    let value = value.trim();
    let invalid = || NodeError::InvalidAttrValue {
        attr: attr.to_string(),
        value: value.to_string(),
    };

    if value.is_empty() {
        return Ok(None);
    }
    let kbit = if let Some(n) = value.strip_suffix("mbit") {
        n.parse::<u64>()
            .map_err(|_| invalid())?
            .checked_mul(1000)
            .ok_or_else(invalid)?
    } else {
        value
            .trim_end_matches("kbit")
            .parse::<u64>()
            .map_err(|_| invalid())?
    };
    Ok((kbit > 0).then_some(kbit))
}
