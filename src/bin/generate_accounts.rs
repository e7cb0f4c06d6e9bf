use anyhow::{Context, Result};
use clap::Parser;
use cti_zk_membership::ethereum::{format_address, ContributorSet};
use ethers::signers::{LocalWallet, Signer};
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate random contributor addresses for testing", long_about = None)]
struct Args {
    #[arg(short, long, default_value_t = 1000)]
    count: usize,

    #[arg(short, long, default_value = "test_accounts.txt")]
    output: PathBuf,
}

fn generate_contributors(count: usize) -> Result<ContributorSet> {
    let mut set = ContributorSet::new();
    let mut rng = rand::thread_rng();
    while set.len() < count {
        let wallet = LocalWallet::new(&mut rng);
        set.register(wallet.address())
            .context("Generated a duplicate address")?;
    }
    Ok(set)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    println!("Generating {} random Ethereum addresses...", args.count);
    let contributors = generate_contributors(args.count)?;

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    for address in contributors.addresses() {
        writeln!(writer, "{}", format_address(address)).context("Failed to write address")?;
    }
    writer.flush().context("Failed to flush accounts file")?;

    info!(
        "Wrote {} addresses to {}",
        contributors.len(),
        args.output.display()
    );
    println!("First 5 addresses:");
    for (i, address) in contributors.addresses().iter().take(5).enumerate() {
        println!("  {}: {}", i + 1, format_address(address));
    }

    Ok(())
}
