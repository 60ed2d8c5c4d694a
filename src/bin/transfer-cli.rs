use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "transfer-cli")]
#[command(about = "Command line client for the transfer node", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8650")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChainArg {
    P,
    C,
}

impl ChainArg {
    fn as_str(&self) -> &'static str {
        match self {
            ChainArg::P => "P",
            ChainArg::C => "C",
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FeePaymentArg {
    /// Fees come out of the amount
    FromAmount,
    /// The destination receives exactly the amount
    OnTop,
}

#[derive(Subcommand)]
enum Commands {
    /// Node status
    Status,
    /// Start a transfer
    Send {
        /// Amount in nAVAX
        #[arg(long)]
        amount: String,
        #[arg(long, value_enum)]
        from: ChainArg,
        #[arg(long, value_enum)]
        to: ChainArg,
        /// Recipient address on the destination chain
        #[arg(long)]
        recipient: String,
        #[arg(long, default_value_t = 0)]
        account: u32,
        #[arg(long, value_enum, default_value = "from-amount")]
        fee_payment: FeePaymentArg,
        /// Print the fee quote without starting the transfer
        #[arg(long)]
        quote_only: bool,
    },
    /// List transfers
    List,
    /// Show a transfer's progress
    Get { id: String },
    /// Cancel (or suspend) a running transfer
    Cancel { id: String },
    /// Resume a halted transfer
    Resume { id: String },
    /// Remove a finished transfer's record
    Forget { id: String },
    /// Import funds stuck in atomic memory
    Recover {
        #[arg(long, default_value_t = 0)]
        account: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/status", base)).send().await?,
        Commands::Send {
            amount,
            from,
            to,
            recipient,
            account,
            fee_payment,
            quote_only,
        } => {
            let body = json!({
                "amount": amount,
                "source_chain": from.as_str(),
                "destination_chain": to.as_str(),
                "account_index": account,
                "destination_address": recipient,
                "fee_payment": match fee_payment {
                    FeePaymentArg::FromAmount => "from_amount",
                    FeePaymentArg::OnTop => "on_top",
                },
            });
            let path = if quote_only { "quotes" } else { "transfers" };
            client
                .post(format!("{}/{}", base, path))
                .json(&body)
                .send()
                .await?
        }
        Commands::List => client.get(format!("{}/transfers", base)).send().await?,
        Commands::Get { id } => client.get(format!("{}/transfers/{}", base, id)).send().await?,
        Commands::Cancel { id } => {
            client
                .post(format!("{}/transfers/{}/cancel", base, id))
                .send()
                .await?
        }
        Commands::Resume { id } => {
            client
                .post(format!("{}/transfers/{}/resume", base, id))
                .send()
                .await?
        }
        Commands::Forget { id } => {
            client
                .delete(format!("{}/transfers/{}", base, id))
                .send()
                .await?
        }
        Commands::Recover { account } => {
            client
                .post(format!("{}/accounts/{}/recover", base, account))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or(text);

    if status.is_success() {
        println!("{}", body);
    } else {
        eprintln!("Error: node returned status {}", status);
        eprintln!("{}", body);
        std::process::exit(1);
    }
    Ok(())
}
