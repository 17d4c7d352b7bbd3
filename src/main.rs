use clap::{Parser as ClapParser, Subcommand};
use eql_lang::cli::{self, CheckOptions, CheckResult, CliError};
use std::io::{self, Read};

#[derive(ClapParser)]
#[command(name = "eql")]
#[command(about = "EQL - typed query documents and expressions over JSON data")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run an EQL expression or query document
    Check {
        /// The expression or document to run
        query: String,

        /// JSON input (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<String>,

        /// JSON object of variables
        #[arg(long)]
        vars: Option<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,

        /// Only validate syntax, don't execute
        #[arg(long)]
        syntax_only: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            query,
            input,
            vars,
            pretty,
            syntax_only,
        } => run_check(CheckOptions {
            query,
            input,
            vars,
            pretty,
            syntax_only,
        }),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run_check(mut options: CheckOptions) -> Result<(), CliError> {
    if options.input.is_none() && !options.syntax_only && !atty::is(atty::Stream::Stdin) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        options.input = Some(buffer);
    }

    match cli::execute_check(&options)? {
        CheckResult::SyntaxValid => println!("Syntax is valid"),
        CheckResult::Success(output) => {
            let json = if options.pretty {
                serde_json::to_string_pretty(&output)
            } else {
                serde_json::to_string(&output)
            }?;
            println!("{}", json);
        }
    }
    Ok(())
}
