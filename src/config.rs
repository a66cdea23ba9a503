use serde::Deserialize;

/// A chat group the user must join before earning the group bonus.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequiredGroup {
    pub chat_id: i64,
    pub name: String,
    pub invite_link: String,
}

/// Which chain the configured node endpoint points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 56,
            Network::Testnet => 97,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Network::Mainnet => "BSC Mainnet",
            Network::Testnet => "BSC Testnet",
        }
    }

    /// Testnet endpoints are recognised by their hostname, same heuristic
    /// the public node URLs follow.
    pub fn from_node_url(url: &str) -> Self {
        if url.contains("testnet") || url.contains("prebsc") {
            Network::Testnet
        } else {
            Network::Mainnet
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bot_token: String,
    pub admin_id: i64,
    pub bsc_node_url: String,
    /// Token contract address. Only the settlement worker needs it; the bot
    /// process starts without one.
    pub contract_address: Option<String>,
    /// Treasury signing key. Worker-only, same as the contract address, so
    /// the key never has to reach the bot's environment.
    pub admin_private_key: Option<String>,
    pub required_groups: Vec<RequiredGroup>,

    /// Maximum approved withdrawals settled per batch pass.
    pub settlement_batch_size: i64,
    /// Seconds between batch passes in loop mode.
    pub settlement_poll_secs: u64,
    /// Seconds to wait between successive transfer submissions.
    pub transfer_delay_secs: u64,
    /// Seconds to block waiting for a transfer confirmation.
    pub confirm_timeout_secs: u64,
    /// Minutes a withdrawal may sit in `processing` before the janitor
    /// presumes the attempt dead.
    pub stale_after_minutes: i64,
    /// Run a single settlement pass and exit (cron-style invocation).
    pub settlement_run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Ok(Self {
            database_url: require("DATABASE_URL")?,
            bot_token: require("BOT_TOKEN")?,
            admin_id: require("ADMIN_ID")?
                .parse()
                .map_err(|_| config::ConfigError::Message("ADMIN_ID must be an integer".into()))?,
            bsc_node_url: std::env::var("BSC_NODE_URL")
                .unwrap_or_else(|_| "https://bsc-dataseed.binance.org/".to_string()),
            contract_address: std::env::var("CONTRACT_ADDRESS").ok(),
            admin_private_key: std::env::var("ADMIN_PRIVATE_KEY").ok(),
            required_groups: parse_required_groups(
                &std::env::var("REQUIRED_GROUPS").unwrap_or_default(),
            )
            .map_err(config::ConfigError::Message)?,
            settlement_batch_size: env_or("SETTLEMENT_BATCH_SIZE", 5),
            settlement_poll_secs: env_or("SETTLEMENT_POLL_SECS", 60),
            transfer_delay_secs: env_or("TRANSFER_DELAY_SECS", 5),
            confirm_timeout_secs: env_or("CONFIRM_TIMEOUT_SECS", 300),
            stale_after_minutes: env_or("STALE_AFTER_MINUTES", 10),
            settlement_run_once: std::env::var("SETTLEMENT_RUN_ONCE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }

    pub fn network(&self) -> Network {
        Network::from_node_url(&self.bsc_node_url)
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.admin_id
    }
}

fn require(key: &str) -> Result<String, config::ConfigError> {
    std::env::var(key).map_err(|_| config::ConfigError::Message(format!("{key} must be set")))
}

fn env_or<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses the REQUIRED_GROUPS env var. Entries are comma-separated, fields
/// within an entry are `chat_id;display name;invite link`.
pub fn parse_required_groups(raw: &str) -> Result<Vec<RequiredGroup>, String> {
    let mut groups = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut fields = entry.splitn(3, ';');
        let chat_id = fields
            .next()
            .and_then(|id| id.trim().parse::<i64>().ok())
            .ok_or_else(|| format!("bad group entry (chat id): {entry:?}"))?;
        let name = fields
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("bad group entry (name): {entry:?}"))?
            .to_string();
        let invite_link = fields.next().map(str::trim).unwrap_or_default().to_string();
        groups.push(RequiredGroup {
            chat_id,
            name,
            invite_link,
        });
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_detection_from_node_url() {
        assert_eq!(
            Network::from_node_url("https://data-seed-prebsc-1-s1.binance.org:8545/"),
            Network::Testnet
        );
        assert_eq!(
            Network::from_node_url("https://bsc-testnet.example.org/"),
            Network::Testnet
        );
        assert_eq!(
            Network::from_node_url("https://bsc-dataseed.binance.org/"),
            Network::Mainnet
        );
        assert_eq!(Network::Testnet.chain_id(), 97);
        assert_eq!(Network::Mainnet.chain_id(), 56);
    }

    #[test]
    fn parses_required_groups() {
        let groups = parse_required_groups(
            "-1002257059748;MetaCore Official;https://t.me/MetaaCore, -1002933970785;Bot News;https://t.me/botnewz1",
        )
        .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].chat_id, -1002257059748);
        assert_eq!(groups[0].name, "MetaCore Official");
        assert_eq!(groups[1].invite_link, "https://t.me/botnewz1");
    }

    #[test]
    fn empty_group_list_is_allowed() {
        assert!(parse_required_groups("").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_group_entry() {
        assert!(parse_required_groups("not-a-number;X;link").is_err());
        assert!(parse_required_groups("-100123").is_err());
    }
}
