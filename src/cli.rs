use std::io::{self, BufRead, Write};

use abacus::client::AbacusClient;
use abacus::model::CalculationRecord;
use abacus::parser::{self, Command};
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(name = "abacus-cli", author, version, about = "Interactive client for the abacus calculator")]
struct Args {
    /// Base URL of the abacus server
    #[clap(long, env = "ABACUS_URL", default_value = "http://127.0.0.1:3000")]
    url: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let client = AbacusClient::new(args.url);

    print_banner();

    match client.health().await {
        Ok(_) => println!("[\u{2713}] Connected to abacus at {}!", client.base_url()),
        Err(e) => {
            println!("[\u{2717}] Could not reach server at {}: {}", client.base_url(), e);
            println!("    Make sure to run 'cargo run --bin abacus' in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("abacus> ");
        if io::stdout().flush().is_err() {
            break;
        }
        buffer.clear();

        match stdin.lock().read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                if let Err(e) = execute_command(&client, cmd).await {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.to_uppercase().starts_with("UPDATE") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'UPDATE <id> SET power 2 10'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   abacus CLI v{} - calculator with a memory", env!("CARGO_PKG_VERSION"));
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. CALCULATE:   add 2 3   |   2 + 3   (+ - * / ^ %)");
    println!("2. HISTORY:     HISTORY [operation]");
    println!("3. GET:         GET <id>");
    println!("4. UPDATE:      UPDATE <id> SET power 2 10");
    println!("5. DELETE:      DELETE <id>");
    println!("6. STATUS:      HEALTH | VERSION");
    println!("7. EXIT:        Quit\n");
}

fn print_record(record: &CalculationRecord) {
    println!(
        "  {} | {} {} {} = {} | {}",
        record.uuid(),
        record.operand1,
        record.operation.symbol(),
        record.operand2,
        record.result,
        serde_json::to_value(record)
        .ok()
        .and_then(|v| v["timestamp"].as_str().map(str::to_string))
        .unwrap_or_default()
    );
}

async fn execute_command(client: &AbacusClient, cmd: Command) -> Result<(), Box<dyn std::error::Error>> {
    match cmd {
        Command::Help => print_help(),
        Command::Calculate { operation, a, b } => {
            let result = client.calculate(operation, a, b).await?;
            println!("= {}", result);
        }
        Command::History { operation } => {
            let records = client.history(operation).await?;
            println!("\n{} calculation(s):", records.len());
            for record in &records {
                print_record(record);
            }
            println!();
        }
        Command::Get { id } => match client.get(id).await? {
            Some(record) => print_record(&record),
            None => println!("[\u{2717}] ID Not Found."),
        },
        Command::Update { id, operation, a, b } => {
            let record = client.update(id, operation, a, b).await?;
            println!("[\u{2713} OK] Updated:");
            print_record(&record);
        }
        Command::Delete { id } => match client.delete(id).await? {
            Some(_) => println!("[\u{2713} OK] Deleted ID: {}", id),
            None => println!("[\u{2717}] ID Not Found."),
        },
        Command::Health => println!("Server is {}", client.health().await?),
        Command::Version => println!("Server version {}", client.version().await?),
        Command::Exit => {}
    }
    Ok(())
}
