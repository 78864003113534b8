//! chunkbus client CLI.
//!
//! Talks to the service over the loopback bus: echo round-trips, file
//! and directory uploads, resume of interrupted transfers, and a signal
//! watcher.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chunkbus_bus_client::{ConnectionSupervisor, SupervisorConfig};
use chunkbus_protocol::Message;
use chunkbus_protocol::constants::{
    DEFAULT_BUS_PORT, Member, OBJECT_PATH, SIG_BOOL, SIG_DOUBLE, SIG_INFO, SIG_INT, SIG_STRING,
};
use chunkbus_protocol::messages::{
    BoolValue, DoubleValue, InfoValue, IntValue, StringValue, TestInfo,
};
use chunkbus_sender::FileSender;
use chunkbus_task_pool::TaskPool;

#[derive(Parser)]
#[command(name = "chunkbus-client", about = "chunkbus client", version)]
struct Cli {
    /// Loopback port of the bus endpoint.
    #[arg(long, default_value_t = DEFAULT_BUS_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Round-trips all five echo values through the service.
    Echo,

    /// Uploads a file or directory tree.
    Send {
        path: PathBuf,

        /// Sender identity carried in every chunk.
        #[arg(long, default_value = "test_user")]
        user: String,

        /// Resumable transfer id (defaults to the file name).
        #[arg(long)]
        transfer_id: Option<String>,

        /// Mode bits applied server-side, octal.
        #[arg(long, default_value = "644", value_parser = parse_octal)]
        mode: u32,
    },

    /// Retransmits the missing chunks of an interrupted transfer.
    Resume {
        transfer_id: String,
        path: PathBuf,

        #[arg(long, default_value = "test_user")]
        user: String,
    },

    /// Prints broadcast signals until interrupted.
    Watch,
}

fn parse_octal(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8).map_err(|e| format!("not an octal mode: {e}"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let url = format!("ws://127.0.0.1:{}{}", cli.port, OBJECT_PATH);
    let supervisor = ConnectionSupervisor::new(url, SupervisorConfig::default());
    supervisor.init().await?;

    let result = match cli.command {
        Command::Echo => echo(&supervisor).await,
        Command::Send {
            path,
            user,
            transfer_id,
            mode,
        } => {
            let transfer_id = transfer_id.unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "transfer".into())
            });
            let sender = FileSender::new(supervisor.clone(), Arc::new(TaskPool::new(0)));
            sender
                .send_entry(&path, &user, mode, &transfer_id)
                .await
                .map_err(Into::into)
        }
        Command::Resume {
            transfer_id,
            path,
            user,
        } => {
            let sender = FileSender::new(supervisor.clone(), Arc::new(TaskPool::new(0)));
            let sent = sender.resume(&transfer_id, &user, &path).await?;
            println!("retransmitted {sent} chunk(s)");
            Ok(())
        }
        Command::Watch => watch(&supervisor).await,
    };

    supervisor.shutdown().await;
    result
}

/// The classic smoke sequence: set and read back all five echo values.
async fn echo(supervisor: &Arc<ConnectionSupervisor>) -> anyhow::Result<()> {
    supervisor
        .call(Member::SetTestBool, Some(&BoolValue { value: true }))
        .await?;
    let reply = supervisor.call::<()>(Member::GetTestBool, None).await?;
    println!("GetTestBool: {:?}", parse::<BoolValue>(&reply)?.value);

    supervisor
        .call(Member::SetTestInt, Some(&IntValue { value: 42 }))
        .await?;
    let reply = supervisor.call::<()>(Member::GetTestInt, None).await?;
    println!("GetTestInt: {}", parse::<IntValue>(&reply)?.value);

    supervisor
        .call(Member::SetTestDouble, Some(&DoubleValue { value: 3.14 }))
        .await?;
    let reply = supervisor.call::<()>(Member::GetTestDouble, None).await?;
    println!("GetTestDouble: {}", parse::<DoubleValue>(&reply)?.value);

    supervisor
        .call(
            Member::SetTestString,
            Some(&StringValue {
                value: "hello bus".into(),
            }),
        )
        .await?;
    let reply = supervisor.call::<()>(Member::GetTestString, None).await?;
    println!("GetTestString: {}", parse::<StringValue>(&reply)?.value);

    let info = TestInfo {
        bool_param: true,
        int_param: 123,
        double_param: 4.56,
        string_param: "struct test".into(),
    };
    supervisor
        .call(Member::SetTestInfo, Some(&InfoValue { value: info }))
        .await?;
    let reply = supervisor.call::<()>(Member::GetTestInfo, None).await?;
    let info = parse::<InfoValue>(&reply)?.value;
    println!(
        "GetTestInfo: bool={} int={} double={} string={}",
        info.bool_param, info.int_param, info.double_param, info.string_param
    );
    Ok(())
}

/// Subscribes to the five `*Changed` signals and prints each delivery.
async fn watch(supervisor: &Arc<ConnectionSupervisor>) -> anyhow::Result<()> {
    let print = |label: &'static str, sig: &'static str| {
        Arc::new(move |msg: Message| match sig {
            SIG_BOOL => {
                if let Ok(Some(v)) = msg.parse_payload::<BoolValue>() {
                    println!("{label}: {}", v.value);
                }
            }
            SIG_INT => {
                if let Ok(Some(v)) = msg.parse_payload::<IntValue>() {
                    println!("{label}: {}", v.value);
                }
            }
            SIG_DOUBLE => {
                if let Ok(Some(v)) = msg.parse_payload::<DoubleValue>() {
                    println!("{label}: {}", v.value);
                }
            }
            SIG_STRING => {
                if let Ok(Some(v)) = msg.parse_payload::<StringValue>() {
                    println!("{label}: {}", v.value);
                }
            }
            _ => {
                if let Ok(Some(v)) = msg.parse_payload::<InfoValue>() {
                    println!(
                        "{label}: bool={} int={} double={} string={}",
                        v.value.bool_param,
                        v.value.int_param,
                        v.value.double_param,
                        v.value.string_param
                    );
                }
            }
        }) as Arc<dyn Fn(Message) + Send + Sync>
    };

    supervisor.subscribe(Member::TestBoolChanged, print("TestBoolChanged", SIG_BOOL));
    supervisor.subscribe(Member::TestIntChanged, print("TestIntChanged", SIG_INT));
    supervisor.subscribe(
        Member::TestDoubleChanged,
        print("TestDoubleChanged", SIG_DOUBLE),
    );
    supervisor.subscribe(
        Member::TestStringChanged,
        print("TestStringChanged", SIG_STRING),
    );
    supervisor.subscribe(Member::TestInfoChanged, print("TestInfoChanged", SIG_INFO));

    println!("watching signals, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(reply: &Message) -> anyhow::Result<T> {
    reply
        .parse_payload::<T>()?
        .ok_or_else(|| anyhow::anyhow!("empty reply payload"))
}
