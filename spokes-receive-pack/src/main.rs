use std::path::PathBuf;

use clap::Parser;

use spokes_receive_pack::config::Config;
use spokes_receive_pack::governor::{self, Conn};
use spokes_receive_pack::interrupt::CancellationFlag;
use spokes_receive_pack::object_format::ObjectFormat;
use spokes_receive_pack::pack::PackStream;
use spokes_receive_pack::protocol::{Session, SpokesReceivePack};
use spokes_receive_pack::{fallback, sockstat, Error};

/// Exit code for "try again later": the governor refused to schedule us.
const EXIT_TEMPORARY_FAILURE: i32 = 75;

#[derive(Debug, Parser)]
#[command(name = "spokes-receive-pack", version, about = "Receive what is pushed into the repository")]
struct Args {
    /// Indicates we are using the HTTP protocol
    #[arg(long)]
    stateless_rpc: bool,
    /// Indicates we only need to announce the references
    #[arg(long)]
    http_backend_info_refs: bool,
    /// Alias of --http-backend-info-refs
    #[arg(long)]
    advertise_refs: bool,
    /// Path to the bare repository receiving the push
    repository: PathBuf,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    init_tracing();

    // Only requests tagged for the quarantined path are ours; everything
    // else goes to the stock implementation untouched.
    if std::env::var("GIT_SOCKSTAT_VAR_spokes_quarantine").as_deref() != Ok("bool:true") {
        return fallback::run(std::env::args_os().skip(1));
    }

    let args = Args::parse();

    let cancel = CancellationFlag::new();
    if let Err(e) = cancel.install() {
        eprintln!("error: installing signal handlers: {e}");
        return 1;
    }

    let repo_path = match std::fs::canonicalize(&args.repository) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error: error entering repo: {e}");
            return 1;
        }
    };

    let mut governor = match governor::start(&repo_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_TEMPORARY_FAILURE;
        }
    };

    let code = match run_push(&args, repo_path, &mut governor, cancel) {
        Ok(()) => 0,
        Err(e) => {
            governor.set_error(1, &e.to_string());
            eprintln!("error: unexpected error running spokes receive pack: {e}");
            1
        }
    };
    governor.finish();
    code
}

fn run_push(
    args: &Args,
    repo_path: PathBuf,
    governor: &mut Conn,
    cancel: CancellationFlag,
) -> spokes_receive_pack::Result<()> {
    let config = Config::read(&repo_path)?;
    let object_format = ObjectFormat::detect(&repo_path)?;

    let quarantine_id = sockstat::get_string("quarantine_id");
    if quarantine_id.is_empty() {
        return Err(Error::MissingSockstatVar("quarantine_id"));
    }

    // An unbuffered duplicate of stdin: the protocol reader consumes exact
    // byte counts, leaving the descriptor positioned at the packfile for
    // index-pack to inherit.
    let input = {
        use std::os::fd::AsFd;
        let fd = std::io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| Error::Io {
                context: "duplicating stdin".to_owned(),
                source: e,
            })?;
        std::fs::File::from(fd)
    };

    let mut rp = SpokesReceivePack::new(
        input,
        std::io::stdout(),
        Session {
            repo_path,
            config,
            object_format,
            stateless_rpc: args.stateless_rpc,
            advertise_refs: args.http_backend_info_refs || args.advertise_refs,
            quarantine_id,
            version: env!("CARGO_PKG_VERSION"),
            cancel,
            pack_stream: PackStream::InheritStdin,
        },
    );

    let result = rp.execute(governor);
    if result.is_err() {
        rp.remove_quarantine();
    }
    result
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
