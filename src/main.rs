use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use minidb::format::{self, DEFAULT_MAX_PAGES};
use minidb::statement::{self, MetaCommand, Statement};
use minidb::{ExecuteResult, SplitPolicy, Table, TableConfig};

#[derive(Debug, Parser)]
#[command(name = "minidb", version, about = "Single-table database shell")]
struct Args {
    /// Database file to open or create.
    #[arg(value_name = "FILE", conflicts_with = "db_file")]
    path: Option<PathBuf>,

    #[arg(long = "db-file", value_name = "FILE")]
    db_file: Option<PathBuf>,

    /// Ceiling on the number of pages in the file.
    #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
    max_pages: u32,

    /// Reject inserts into a full leaf instead of splitting it.
    #[arg(long)]
    no_split: bool,
}

impl Args {
    fn db_path(&self) -> PathBuf {
        self.path
            .clone()
            .or_else(|| self.db_file.clone())
            .unwrap_or_else(|| PathBuf::from("db.txt"))
    }

    fn table_config(&self) -> TableConfig {
        let policy = if self.no_split {
            SplitPolicy::Reject
        } else {
            SplitPolicy::Split
        };
        TableConfig::default()
            .with_max_pages(self.max_pages)
            .with_split_policy(policy)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let path = args.db_path();

    let mut table = match Table::open_with(&path, args.table_config()) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: unable to open database \"{}\": {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    // Close on every exit path, including a failed statement.
    let result = run(&mut table);
    let closed = table.close();

    let mut code = ExitCode::SUCCESS;
    for e in [result.err(), closed.err()].into_iter().flatten() {
        eprintln!("Error: {e}");
        code = ExitCode::FAILURE;
    }
    code
}

/// Read and execute lines until `.exit` or end of input.
fn run(table: &mut Table) -> minidb::Result<()> {
    let stdin = io::stdin();
    let is_tty = stdin.is_terminal();
    let mut reader = stdin.lock();

    loop {
        if is_tty {
            let mut out = io::stdout().lock();
            let _ = out.write_all(b"db> ");
            let _ = out.flush();
        }

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            match MetaCommand::parse(input) {
                Ok(MetaCommand::Exit) => return Ok(()),
                Ok(command) => handle_dot_command(command, table)?,
                Err(e) => println!("{e}"),
            }
            continue;
        }

        match statement::prepare(input) {
            Ok(stmt) => execute(stmt, table)?,
            Err(e) => println!("{e}"),
        }
    }
}

fn handle_dot_command(command: MetaCommand, table: &mut Table) -> minidb::Result<()> {
    match command {
        MetaCommand::Exit => {}
        MetaCommand::Btree => {
            println!("Tree:");
            print!("{}", table.btree_listing()?);
        }
        MetaCommand::Constants => {
            println!("Constants:");
            print!("{}", format::layout_constants());
        }
    }
    Ok(())
}

fn execute(stmt: Statement, table: &mut Table) -> minidb::Result<()> {
    match stmt {
        Statement::Insert(row) => match table.insert(&row)? {
            ExecuteResult::Success => println!("Executed."),
            ExecuteResult::DuplicateKey => println!("Error: Duplicate key."),
            ExecuteResult::TableFull => println!("Error: Table full."),
        },
        Statement::Select => {
            for row in table.scan() {
                println!("{}", row?);
            }
            println!("Executed.");
        }
    }
    Ok(())
}
