//! Command-line and environment configuration.
//!
//! Every option can be given as a flag or through the environment (a `.env`
//! file is loaded first). [`CliArgs`] is the raw clap surface; [`ServerConfig`]
//! is the validated form the rest of the binary works with.

use anyhow::bail;
use callme::{AllocatorConfig, AreaCode, SenderConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use core::str::FromStr;
use std::time::Duration;

const MAX_BATCH_SIZE: usize = 100;
const MAX_SEED_COUNT: u32 = 10_000;

#[derive(Parser, Debug)]
#[command(name = "callme-tonic-server", version, about)]
pub struct CliArgs {
    /// Address to listen on, or a socket path with `--uds`.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:50051", global = true)]
    pub server_addr: String,

    /// Treat `--server-addr` as a Unix domain socket path.
    #[arg(short, long, env = "SERVER_UDS", default_value_t = false, global = true)]
    pub uds: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve `PhoneBookService` (exists, reserve, assign).
    Phonebook(PhonebookArgs),
    /// Serve `SmsService` (send one, send many).
    Sms(SmsArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PoolStrategy {
    /// Redis sets for the pool, PostgreSQL for the phonebook.
    Cache,
    /// One PostgreSQL table for pool and reservations.
    Transactional,
    /// Process-local state. Lost on restart.
    Memory,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum MessageStoreKind {
    Postgres,
    Memory,
}

#[derive(Args, Debug)]
pub struct PhonebookArgs {
    #[arg(long, env = "POOL_STRATEGY", value_enum, default_value_t = PoolStrategy::Cache)]
    pub pool_strategy: PoolStrategy,

    #[arg(long, env = "REDIS_URL", hide_env_values = true)]
    pub redis_url: Option<String>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Numbers held by one reservation.
    #[arg(long, env = "RESERVE_BATCH_SIZE", default_value_t = callme::DEFAULT_BATCH_SIZE)]
    pub reserve_batch_size: usize,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Numbers to add to the pool at startup, as `<area code>:<count>`.
    #[arg(long, env = "SEED", value_delimiter = ',')]
    pub seed: Vec<SeedSpec>,
}

#[derive(Args, Debug)]
pub struct SmsArgs {
    #[arg(long, env = "MESSAGE_STORE", value_enum, default_value_t = MessageStoreKind::Postgres)]
    pub message_store: MessageStoreKind,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Phonebook service used to check both ends of a message.
    #[arg(long, env = "PHONEBOOK_URL", default_value = "http://phonebook-service:50051")]
    pub phonebook_url: String,

    /// Pause between two messages of a `SendMany` batch.
    #[arg(long, env = "SEND_MANY_DELAY_MS", default_value_t = 100)]
    pub send_many_delay_ms: u64,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,
}

/// Synthetic numbers for one area code: `+1<area><0000..count>`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SeedSpec {
    pub area_code: AreaCode,
    pub count: u32,
}

impl FromStr for SeedSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, count) = s
            .split_once(':')
            .ok_or_else(|| format!("expected <area code>:<count>, got {s:?}"))?;
        let code: u32 = code
            .trim()
            .parse()
            .map_err(|e| format!("bad area code {code:?}: {e}"))?;
        let area_code = AreaCode::new(code).map_err(|e| e.to_string())?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|e| format!("bad count {count:?}: {e}"))?;
        if count == 0 || count > MAX_SEED_COUNT {
            return Err(format!("count must be in 1..={MAX_SEED_COUNT}, got {count}"));
        }
        Ok(Self { area_code, count })
    }
}

#[derive(Clone, Debug)]
pub enum PhonebookBackend {
    Cache {
        redis_url: String,
        database_url: String,
    },
    Transactional {
        database_url: String,
    },
    Memory,
}

#[derive(Clone, Debug)]
pub enum MessageBackend {
    Postgres { database_url: String },
    Memory,
}

#[derive(Clone, Debug)]
pub struct PhonebookConfig {
    pub backend: PhonebookBackend,
    pub allocator: AllocatorConfig,
    pub db_max_connections: u32,
    pub seed: Vec<SeedSpec>,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub backend: MessageBackend,
    pub phonebook_url: String,
    pub sender: SenderConfig,
    pub db_max_connections: u32,
}

#[derive(Clone, Debug)]
pub enum Role {
    Phonebook(PhonebookConfig),
    Sms(SmsConfig),
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub role: Role,
}

impl ServerConfig {
    /// Short role name for logs.
    pub const fn role_name(&self) -> &'static str {
        match self.role {
            Role::Phonebook(_) => "phonebook",
            Role::Sms(_) => "sms",
        }
    }
}

fn require(value: Option<String>, name: &str, strategy: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{name} is required for the {strategy} strategy"),
    }
}

impl TryFrom<PhonebookArgs> for PhonebookConfig {
    type Error = anyhow::Error;

    fn try_from(args: PhonebookArgs) -> Result<Self, Self::Error> {
        if args.reserve_batch_size == 0 || args.reserve_batch_size > MAX_BATCH_SIZE {
            bail!(
                "RESERVE_BATCH_SIZE must be in 1..={MAX_BATCH_SIZE}, got {}",
                args.reserve_batch_size
            );
        }

        let backend = match args.pool_strategy {
            PoolStrategy::Cache => PhonebookBackend::Cache {
                redis_url: require(args.redis_url, "REDIS_URL", "cache")?,
                database_url: require(args.database_url, "DATABASE_URL", "cache")?,
            },
            PoolStrategy::Transactional => PhonebookBackend::Transactional {
                database_url: require(args.database_url, "DATABASE_URL", "transactional")?,
            },
            PoolStrategy::Memory => PhonebookBackend::Memory,
        };

        if !matches!(backend, PhonebookBackend::Memory) && args.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than 0");
        }

        Ok(Self {
            backend,
            allocator: AllocatorConfig {
                batch_size: args.reserve_batch_size,
            },
            db_max_connections: args.db_max_connections,
            seed: args.seed,
        })
    }
}

impl TryFrom<SmsArgs> for SmsConfig {
    type Error = anyhow::Error;

    fn try_from(args: SmsArgs) -> Result<Self, Self::Error> {
        let backend = match args.message_store {
            MessageStoreKind::Postgres => {
                if args.db_max_connections == 0 {
                    bail!("DB_MAX_CONNECTIONS must be greater than 0");
                }
                MessageBackend::Postgres {
                    database_url: require(args.database_url, "DATABASE_URL", "postgres")?,
                }
            }
            MessageStoreKind::Memory => MessageBackend::Memory,
        };

        if !(args.phonebook_url.starts_with("http://") || args.phonebook_url.starts_with("https://"))
        {
            bail!(
                "PHONEBOOK_URL must start with http:// or https://, got {:?}",
                args.phonebook_url
            );
        }

        Ok(Self {
            backend,
            phonebook_url: args.phonebook_url,
            sender: SenderConfig {
                send_many_delay: Duration::from_millis(args.send_many_delay_ms),
            },
            db_max_connections: args.db_max_connections,
        })
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        let role = match args.command {
            Command::Phonebook(args) => Role::Phonebook(args.try_into()?),
            Command::Sms(args) => Role::Sms(args.try_into()?),
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            core::iter::once("callme-tonic-server").chain(args.iter().copied()),
        )?;
        ServerConfig::try_from(args)
    }

    // Store URLs exported for the ignored backend tests would satisfy the
    // "missing URL" cases below.
    fn env_has(names: &[&str]) -> bool {
        names.iter().any(|name| std::env::var_os(name).is_some())
    }

    #[test]
    fn memory_phonebook_needs_no_urls() {
        let config = parse(&["phonebook", "--pool-strategy", "memory", "--seed", "613:20,416:5"])
            .unwrap();
        let Role::Phonebook(phonebook) = config.role else {
            panic!("expected phonebook role");
        };
        assert!(matches!(phonebook.backend, PhonebookBackend::Memory));
        assert_eq!(phonebook.allocator.batch_size, callme::DEFAULT_BATCH_SIZE);
        assert_eq!(phonebook.seed.len(), 2);
        assert_eq!(phonebook.seed[0].area_code.get(), 613);
        assert_eq!(phonebook.seed[1].count, 5);
    }

    #[test]
    fn cache_strategy_requires_both_stores() {
        if env_has(&["REDIS_URL"]) {
            return;
        }
        let err = parse(&[
            "phonebook",
            "--pool-strategy",
            "cache",
            "--database-url",
            "postgres://localhost/callme",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("REDIS_URL"));

        let config = parse(&[
            "phonebook",
            "--pool-strategy",
            "cache",
            "--redis-url",
            "redis://localhost:6379",
            "--database-url",
            "postgres://localhost/callme",
        ])
        .unwrap();
        assert_eq!(config.role_name(), "phonebook");
    }

    #[test]
    fn transactional_strategy_requires_a_database() {
        if env_has(&["DATABASE_URL"]) {
            return;
        }
        let err = parse(&["phonebook", "--pool-strategy", "transactional"]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn batch_size_is_bounded() {
        for size in ["0", "101"] {
            let err = parse(&[
                "phonebook",
                "--pool-strategy",
                "memory",
                "--reserve-batch-size",
                size,
            ])
            .unwrap_err();
            assert!(err.to_string().contains("RESERVE_BATCH_SIZE"));
        }
    }

    #[test]
    fn seed_specs_are_validated() {
        assert!("613:10".parse::<SeedSpec>().is_ok());
        assert!("613".parse::<SeedSpec>().is_err());
        assert!("0:10".parse::<SeedSpec>().is_err());
        assert!("613:0".parse::<SeedSpec>().is_err());
        assert!("abc:10".parse::<SeedSpec>().is_err());
    }

    #[test]
    fn sms_defaults() {
        let config = parse(&["--server-addr", "127.0.0.1:6000", "sms", "--message-store", "memory"])
            .unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:6000");
        let Role::Sms(sms) = config.role else {
            panic!("expected sms role");
        };
        assert_eq!(sms.phonebook_url, "http://phonebook-service:50051");
        assert_eq!(sms.sender.send_many_delay, Duration::from_millis(100));
    }

    #[test]
    fn sms_rejects_bad_phonebook_url() {
        let err = parse(&[
            "sms",
            "--message-store",
            "memory",
            "--phonebook-url",
            "phonebook:50051",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PHONEBOOK_URL"));
    }

    #[test]
    fn postgres_message_store_requires_a_database() {
        if env_has(&["DATABASE_URL"]) {
            return;
        }
        let err = parse(&["sms", "--message-store", "postgres"]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
