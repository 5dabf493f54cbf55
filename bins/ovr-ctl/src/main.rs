use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lisp::{
    ApiDevice, ApiMsgType, ApiOperation, ApiTarget, EidDto, MapServerDto, MappingDto, RlocDto,
    API_HEADER_LEN,
};

#[derive(Parser)]
#[command(name = "ovr-ctl", about = "Management client for ovr-lispd")]
struct Cli {
    /// Path of the daemon's management socket
    #[arg(short, long, default_value = "/var/run/ovr-lispd.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or edit the map-cache
    Cache {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Inspect or edit the local mapping database
    Db {
        #[command(subcommand)]
        action: MappingAction,
    },

    /// Inspect or edit the Map-Server list
    Ms {
        #[command(subcommand)]
        action: MsAction,
    },

    /// Inspect or edit the proxy-ETR list
    Petr {
        #[command(subcommand)]
        action: PetrAction,
    },
}

#[derive(Subcommand)]
enum MappingAction {
    /// List every entry
    List,

    /// Add an entry; with no RLOCs a cache add triggers a resolution
    Add {
        eid: String,

        /// RLOC as address[,priority[,weight]]; repeatable
        #[arg(short, long)]
        rloc: Vec<String>,
    },

    /// Delete the entry for an EID
    Del { eid: String },
}

#[derive(Subcommand)]
enum MsAction {
    List,
    Add {
        address: String,

        #[arg(short, long)]
        key: String,

        #[arg(long)]
        proxy_reply: bool,
    },
    Del {
        address: String,
    },
}

#[derive(Subcommand)]
enum PetrAction {
    List,
    Add {
        address: String,

        #[arg(short, long, default_value_t = 1)]
        priority: u8,

        #[arg(short, long, default_value_t = 100)]
        weight: u8,
    },
    Del {
        address: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let (target, operation, payload) = match cli.command {
        Command::Cache { action } => mapping_request(ApiTarget::MapCache, action)?,
        Command::Db { action } => mapping_request(ApiTarget::LocalDb, action)?,
        Command::Ms { action } => match action {
            MsAction::List => (ApiTarget::MapServers, ApiOperation::ReadAll, Vec::new()),
            MsAction::Add {
                address,
                key,
                proxy_reply,
            } => (
                ApiTarget::MapServers,
                ApiOperation::Create,
                serde_json::to_vec(&MapServerDto {
                    address,
                    key,
                    proxy_reply,
                })?,
            ),
            MsAction::Del { address } => (
                ApiTarget::MapServers,
                ApiOperation::Delete,
                serde_json::to_vec(&EidDto { eid: address })?,
            ),
        },
        Command::Petr { action } => match action {
            PetrAction::List => (ApiTarget::Petrs, ApiOperation::ReadAll, Vec::new()),
            PetrAction::Add {
                address,
                priority,
                weight,
            } => (
                ApiTarget::Petrs,
                ApiOperation::Create,
                serde_json::to_vec(&RlocDto {
                    address,
                    priority,
                    weight,
                    state: None,
                })?,
            ),
            PetrAction::Del { address } => (
                ApiTarget::Petrs,
                ApiOperation::Delete,
                serde_json::to_vec(&RlocDto {
                    address,
                    priority: 1,
                    weight: 100,
                    state: None,
                })?,
            ),
        },
    };

    let reply = exchange(&cli.socket, target, operation, &payload)?;
    render(&reply)
}

fn mapping_request(
    target: ApiTarget,
    action: MappingAction,
) -> Result<(ApiTarget, ApiOperation, Vec<u8>)> {
    Ok(match action {
        MappingAction::List => (target, ApiOperation::ReadAll, Vec::new()),
        MappingAction::Add { eid, rloc } => {
            let rlocs = rloc
                .iter()
                .map(|spec| parse_rloc(spec))
                .collect::<Result<Vec<_>>>()?;
            (
                target,
                ApiOperation::Create,
                serde_json::to_vec(&MappingDto {
                    eid,
                    ttl: 10,
                    action: None,
                    rlocs,
                })?,
            )
        }
        MappingAction::Del { eid } => (
            target,
            ApiOperation::Delete,
            serde_json::to_vec(&EidDto { eid })?,
        ),
    })
}

/// "address[,priority[,weight]]"
fn parse_rloc(spec: &str) -> Result<RlocDto> {
    let mut parts = spec.split(',');
    let address = parts
        .next()
        .context("empty rloc specification")?
        .to_string();
    let priority = match parts.next() {
        Some(p) => p.parse().context("invalid rloc priority")?,
        None => 1,
    };
    let weight = match parts.next() {
        Some(w) => w.parse().context("invalid rloc weight")?,
        None => 100,
    };
    Ok(RlocDto {
        address,
        priority,
        weight,
        state: None,
    })
}

/// Send one request frame and read the single result frame back.
fn exchange(
    socket: &PathBuf,
    target: ApiTarget,
    operation: ApiOperation,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("cannot connect to {}", socket.display()))?;

    let mut frame = vec![
        ApiDevice::Xtr.to_u8(),
        target.to_u8(),
        operation.to_u8(),
        ApiMsgType::Request.to_u8(),
    ];
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    stream.write_all(&frame)?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply)?;
    Ok(reply)
}

fn render(reply: &[u8]) -> Result<()> {
    if reply.len() < API_HEADER_LEN + 1 {
        bail!("short reply from daemon");
    }

    let status = reply[API_HEADER_LEN];
    let data = &reply[API_HEADER_LEN + 1..];

    if status != 0 {
        bail!("daemon reported an error");
    }

    if data.is_empty() {
        println!("ok");
    } else {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
