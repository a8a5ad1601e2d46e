//! CLI commands for the salelock developer tool
//!
//! Implements all command handlers for the CLI interface.

use std::path::Path;
use std::sync::Arc;

use salelock::config::MarketConfig;
use salelock::core::{Script, NOMINAL_ITEM_VALUE};
use salelock::crypto::{Address, KeyPair, MAINNET_ADDRESS_VERSION, TESTNET_ADDRESS_VERSION};
use salelock::devnet::{DevChain, DevWallet};
use salelock::market::Marketplace;
use salelock::salelock::{parse, render, SaleTerms};
use salelock::services::OutputResolver;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load the config file when given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> CliResult<MarketConfig> {
    match path {
        Some(path) => Ok(MarketConfig::load(path)?),
        None => Ok(MarketConfig::default()),
    }
}

/// Version byte for the selected network
pub fn address_version(testnet: bool) -> u8 {
    if testnet {
        TESTNET_ADDRESS_VERSION
    } else {
        MAINNET_ADDRESS_VERSION
    }
}

/// Generate a key pair and print its address
pub fn cmd_keygen(testnet: bool) -> CliResult<()> {
    let key = KeyPair::generate();
    println!("🔑 New key pair");
    println!("   Private key: {}", key.private_key_hex());
    println!("   Public key:  {}", key.public_key_hex());
    println!("   Address:     {}", key.address_with_version(address_version(testnet)));
    Ok(())
}

/// Render a sale-lock script from terms
pub fn cmd_render(
    config: &MarketConfig,
    cancel: &str,
    payee: &str,
    price: u64,
    asset_id: &str,
    metadata: &[u8],
) -> CliResult<()> {
    let terms = SaleTerms::new(
        cancel.parse::<Address>()?,
        payee.parse::<Address>()?,
        price,
        metadata.to_vec(),
        asset_id,
    );
    terms.validate(&config.terms_limits())?;
    let script = render(&terms);

    println!("📜 Sale-lock script ({} bytes)", script.len());
    println!("   Hex: {}", script.to_hex());
    println!("   Asm: {}", script.to_asm());
    Ok(())
}

/// Recover sale terms from a script
pub fn cmd_parse(script_hex: &str, version: u8) -> CliResult<()> {
    let script = Script::from_hex(script_hex)?;
    let terms = parse(&script, version)?;
    println!("{}", serde_json::to_string_pretty(&terms)?);
    Ok(())
}

/// Write the default configuration to a file
pub fn cmd_init_config(output: &Path) -> CliResult<()> {
    if output.exists() {
        println!("⚠️  {} already exists", output.display());
        return Ok(());
    }
    MarketConfig::default().save(output)?;
    println!("✅ Wrote default configuration to {}", output.display());
    Ok(())
}

/// Run list, purchase and cancel flows against an in-process network
pub fn cmd_simulate(config: MarketConfig, price: u64) -> CliResult<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(simulate(config, price))
}

async fn simulate(config: MarketConfig, price: u64) -> CliResult<()> {
    let seller = KeyPair::generate();
    let terms = SaleTerms::new(
        seller.address(),
        seller.address(),
        price,
        b"{\"name\":\"Simulated Sword\"}".to_vec(),
        "sim-sword-1",
    );
    terms.validate(&config.terms_limits())?;
    let funding = price
        .checked_mul(2)
        .and_then(|p| p.checked_add(100_000))
        .ok_or("price too large to simulate")?;

    let chain = Arc::new(DevChain::new());
    let wallet = DevWallet::new(KeyPair::generate(), chain.clone());
    for _ in 0..6 {
        chain
            .fund(Script::p2pkh(&wallet.pubkey_hash()), funding)
            .await;
    }
    let market = Marketplace::new(chain.as_ref(), &wallet, chain.as_ref(), &config)?;

    let buyer = KeyPair::generate();
    println!("🧪 Simulating on an in-process chain");
    println!("   Seller: {}", seller.address());
    println!("   Buyer:  {}", buyer.address());

    // List
    let item = chain
        .fund(Script::p2pkh(&seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
        .await;
    let mut record = market
        .list_item(item, &seller, terms.clone(), "sim-seller", "sim-item-1")
        .await?;
    println!("\n📦 Listed at {} satoshis: {}", price, record.output_reference);

    // Underpay
    if price > 1 {
        match market
            .purchase_listing(&mut record, &buyer.address(), price - 1)
            .await
        {
            Ok(_) => println!("❌ Underpayment unexpectedly accepted"),
            Err(e) => println!("🛑 Underpayment refused: {}", e.safe_message()),
        }
    }

    // Purchase
    let bought = market
        .purchase_listing(&mut record, &buyer.address(), price)
        .await?;
    println!("💰 Purchased; buyer now holds {}", bought);
    println!("   Listing status: {:?}", record.status);

    // Cancel a second listing
    let item = chain
        .fund(Script::p2pkh(&seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
        .await;
    let mut second = market
        .list_item(item, &seller, terms.clone(), "sim-seller", "sim-item-2")
        .await?;
    let returned = market.cancel_listing(&mut second, &seller).await?;
    println!("↩️  Cancelled second listing; item back at {}", returned);

    // Two buyers race for a third listing
    let item = chain
        .fund(Script::p2pkh(&seller.pubkey_hash()), NOMINAL_ITEM_VALUE)
        .await;
    let third = market
        .list_item(item, &seller, terms, "sim-seller", "sim-item-3")
        .await?;
    let (first_buyer, second_buyer) = (buyer.address(), KeyPair::generate().address());
    let (mut first_record, mut second_record) = (third.clone(), third);
    let (first, second) = futures::join!(
        market.purchase_listing(&mut first_record, &first_buyer, price),
        market.purchase_listing(&mut second_record, &second_buyer, price),
    );
    for (who, result) in [("first", first), ("second", second)] {
        match result {
            Ok(item) => println!("🏁 {} buyer won the race: {}", who, item),
            Err(e) => println!("⚔️  {} buyer lost: {}", who, e.safe_message()),
        }
    }
    println!("   Records agree: {:?} / {:?}", first_record.status, second_record.status);

    chain.mine_block().await;
    let resolved = chain.resolve(&bought).await?;
    resolved.proof_bundle.verify(&chain.checkpoints().await)?;
    println!(
        "\n⛓️  Chain height {}; buyer's item proven by a {}-transaction bundle",
        chain.height().await,
        resolved.proof_bundle.len()
    );
    Ok(())
}
