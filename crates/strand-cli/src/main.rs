//! strand database CLI.
//!
//! Provides the `strand` binary for inspecting and lightly editing a
//! SQLite-backed strand database: bootstrap it, walk its history, look at
//! nodes and entities, run attribute queries, declare attributes, export the
//! DAG as Graphviz, and re-verify stored node hashes.
//!
//! Exit codes: 0 = success, 1 = bad input, 2 = database error, 3 = I/O error.

mod render;

use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use strand_core::{Gid, Hash, SchemaLookup};
use strand_db::{AttrDef, Conn, DbConfig, DbError, Pred};

/// strand fact database tools.
#[derive(Parser)]
#[command(name = "strand", about = "strand fact database tools")]
struct Cli {
    /// Path to the database file.
    #[arg(long, global = true, env = "STRAND_DB_PATH", default_value = "strand.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the database if needed and print its head.
    Init,
    /// Print the head hash.
    Head,
    /// List the primary lineage, newest first.
    Log {
        /// Maximum number of nodes to list.
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one node and its facts.
    Show {
        /// Full node hash (40 hex characters).
        hash: String,
    },
    /// List declared attributes.
    Attrs,
    /// Declare a new attribute.
    Declare {
        /// Attribute name, e.g. `User/email`.
        name: String,
        /// Value type: bool, byte, int, long, string, bytes, decimal, instant, zoned, ref.
        value_type: String,
        /// Values must be unique across entities.
        #[arg(long)]
        unique: bool,
        /// The attribute holds a list of values.
        #[arg(long)]
        list: bool,
    },
    /// Print an entity as JSON, with refs expanded.
    Pull {
        /// Entity id as `instance:local`.
        gid: String,
        /// How many levels of refs to expand.
        #[arg(short, long, default_value_t = 1)]
        depth: usize,
    },
    /// List entities having an attribute, optionally with a given value.
    Query {
        attr: String,
        /// Only entities whose value equals this one.
        #[arg(long)]
        eq: Option<String>,
    },
    /// Print the full history as a Graphviz digraph.
    Dot,
    /// Re-hash every stored node.
    Verify,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match open(&cli.db) {
        Ok(conn) => dispatch(&conn, cli.command),
        Err(code) => code,
    };
    process::exit(exit_code);
}

fn dispatch(conn: &Conn, command: Commands) -> i32 {
    match command {
        Commands::Init | Commands::Head => {
            println!("{}", conn.head_hash());
            0
        }
        Commands::Log { limit } => run_log(conn, limit),
        Commands::Show { hash } => run_show(conn, &hash),
        Commands::Attrs => run_attrs(conn),
        Commands::Declare {
            name,
            value_type,
            unique,
            list,
        } => run_declare(conn, &name, &value_type, unique, list),
        Commands::Pull { gid, depth } => run_pull(conn, &gid, depth),
        Commands::Query { attr, eq } => run_query(conn, &attr, eq.as_deref()),
        Commands::Dot => run_dot(conn),
        Commands::Verify => run_verify(conn),
    }
}

fn open(db_path: &str) -> Result<Conn, i32> {
    tracing::debug!("Opening database {}", db_path);
    let config = DbConfig::from_env().map_err(|e| report(&e))?;
    Conn::open_sqlite(db_path, config).map_err(|e| {
        eprintln!("Error: failed to open database '{}'", db_path);
        report(&e)
    })
}

/// Prints `err` and returns its exit code.
fn report(err: &DbError) -> i32 {
    eprintln!("Error: {}", err);
    match err {
        DbError::Config { .. } => 1,
        DbError::Storage(_) => 3,
        _ => 2,
    }
}

fn run_log(conn: &Conn, limit: usize) -> i32 {
    match conn.log(limit) {
        Ok(nodes) => {
            for node in &nodes {
                println!("{}", render::log_line(node));
            }
            0
        }
        Err(e) => report(&e),
    }
}

fn run_show(conn: &Conn, raw: &str) -> i32 {
    let hash = match raw.parse::<Hash>() {
        Ok(hash) => hash,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match conn.graph().resolve_hash(&hash) {
        Ok(node) => {
            print!("{}", render::node_text(&node));
            0
        }
        Err(e) => report(&e.into()),
    }
}

fn run_attrs(conn: &Conn) -> i32 {
    let db = conn.db();
    let mut attrs: Vec<_> = db.attrs().collect();
    attrs.sort_by_key(|attr| attr.id);
    for attr in attrs {
        println!("{}", render::attr_line(attr));
    }
    0
}

fn run_declare(conn: &Conn, name: &str, value_type: &str, unique: bool, list: bool) -> i32 {
    let value_type = match render::parse_value_type(value_type) {
        Ok(ty) => ty,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return 1;
        }
    };
    let mut def = AttrDef::new(name, value_type);
    def.unique = unique;
    def.list = list;
    match conn.declare(&[def]) {
        Ok(_) => {
            match conn.db().attr(name) {
                Some(attr) => println!("{}", render::attr_line(attr)),
                None => println!("{}", name),
            }
            0
        }
        Err(e) => report(&e),
    }
}

fn run_pull(conn: &Conn, raw: &str, depth: usize) -> i32 {
    let gid = match raw.parse::<Gid>() {
        Ok(gid) => gid,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match conn.db().pull(gid, depth) {
        Some(pulled) => {
            let json = serde_json::to_string_pretty(&pulled).unwrap_or_else(|e| {
                format!("{{\"error\": \"failed to serialize entity: {}\"}}", e)
            });
            println!("{}", json);
            0
        }
        None => {
            eprintln!("No entity {}", gid);
            1
        }
    }
}

fn run_query(conn: &Conn, attr: &str, eq: Option<&str>) -> i32 {
    let db = conn.db();
    let Some(def) = db.attr(attr) else {
        eprintln!("Error: unknown attribute '{}'", attr);
        return 1;
    };
    let pred = match eq {
        None => Pred::has(attr),
        Some(raw) => match render::parse_value(def.value_type(), raw) {
            Ok(value) => Pred::eq(attr, value),
            Err(msg) => {
                eprintln!("Error: {}", msg);
                return 1;
            }
        },
    };
    for (gid, facts) in db.query(&[pred]).entities() {
        print!("{}", render::entity_text(gid, facts));
    }
    0
}

fn run_dot(conn: &Conn) -> i32 {
    match conn.history() {
        Ok(history) => {
            print!("{}", history.to_dot());
            0
        }
        Err(e) => report(&e),
    }
}

fn run_verify(conn: &Conn) -> i32 {
    let store = conn.store();
    let hashes = match store.node_hashes() {
        Ok(hashes) => hashes,
        Err(e) => return report(&e.into()),
    };
    let mut bad = 0usize;
    for hash in &hashes {
        match store.verify(hash) {
            Ok(true) => {}
            Ok(false) => {
                eprintln!("missing: {}", hash);
                bad += 1;
            }
            Err(e) => {
                eprintln!("corrupt: {} ({})", hash, e);
                bad += 1;
            }
        }
    }
    println!("{} nodes checked, {} bad", hashes.len(), bad);
    if bad == 0 {
        0
    } else {
        2
    }
}
