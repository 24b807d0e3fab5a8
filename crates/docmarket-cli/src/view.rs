// Terminal rendering for listings, purchases, the cart and wallet state

use colored::Colorize;
use docmarket_core::{truncate_address, Cart};
use docmarket_market::models::{Document, PendingWrite, Purchase};

const TITLE_WIDTH: usize = 28;

/// Cuts text to `width` characters, marking the cut with "...".
pub fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Shortens a 0x-prefixed hash: "0x1234abcd...89ef"
pub fn short_hash(hash: &str) -> String {
    if hash.len() <= 16 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..10], &hash[hash.len() - 4..])
}

pub fn document_header() -> String {
    format!(
        "{:<15} {:<width$} {:>12} {:>6}  {:<13} {}",
        "ID",
        "TITLE",
        "PRICE",
        "AMOUNT",
        "SELLER",
        "STATUS",
        width = TITLE_WIDTH
    )
}

pub fn document_row(doc: &Document) -> String {
    let status = if doc.is_active { "active" } else { "inactive" };
    format!(
        "{:<15} {:<width$} {:>12} {:>6}  {:<13} {}",
        doc.id,
        clip(&doc.title, TITLE_WIDTH),
        doc.price_per_token.normalized().to_string(),
        doc.amount,
        truncate_address(&doc.seller),
        status,
        width = TITLE_WIDTH
    )
}

pub fn print_documents(docs: &[Document]) {
    if docs.is_empty() {
        println!("{}", "No documents found.".dimmed());
        return;
    }
    println!("{}", document_header().bold());
    for doc in docs {
        println!("{}", document_row(doc));
    }
}

pub fn print_document(doc: &Document) {
    println!("{}", doc.title.bold());
    println!();
    println!("  ID:          {}", doc.id);
    println!("  Description: {}", doc.description);
    println!("  Seller:      {}", doc.seller);
    println!("  Price:       {} ETH per unit", doc.price_per_token.normalized());
    println!("  Amount:      {}", doc.amount);
    println!("  File:        {}", doc.file_url);
    if let Some(hash) = &doc.file_hash {
        println!("  SHA-256:     {}", hash);
    }
    let status = if doc.is_active {
        "active".green()
    } else {
        "inactive".yellow()
    };
    println!("  Status:      {}", status);
    println!("  Created:     {}", doc.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

pub fn purchase_row(purchase: &Purchase) -> String {
    format!(
        "{:<15} {:>8} {:>14}  {:<13} {:<18} {}",
        purchase.doc_id,
        purchase.quantity,
        purchase.total_price.normalized().to_string(),
        truncate_address(&purchase.buyer),
        short_hash(&purchase.tx_hash),
        purchase.created_at.format("%Y-%m-%d %H:%M")
    )
}

pub fn print_purchases(purchases: &[Purchase]) {
    if purchases.is_empty() {
        println!("{}", "No purchases found.".dimmed());
        return;
    }
    println!(
        "{}",
        format!(
            "{:<15} {:>8} {:>14}  {:<13} {:<18} {}",
            "DOCUMENT", "QUANTITY", "TOTAL", "BUYER", "TX", "DATE"
        )
        .bold()
    );
    for purchase in purchases {
        println!("{}", purchase_row(purchase));
    }
}

/// One line per cart item plus a total line.
pub fn cart_lines(cart: &Cart) -> Vec<String> {
    let mut lines: Vec<String> = cart
        .items()
        .iter()
        .map(|item| {
            let line_total = item
                .line_total()
                .map(|t| t.normalized().to_string())
                .unwrap_or_else(|_| "?".to_string());
            format!(
                "{:<15} {:<width$} {:>4} x {:>10} = {:>12}",
                item.doc_id,
                clip(&item.title, TITLE_WIDTH),
                item.quantity,
                item.price_per_unit,
                line_total,
                width = TITLE_WIDTH
            )
        })
        .collect();
    let total = cart
        .total()
        .map(|t| t.normalized().to_string())
        .unwrap_or_else(|_| "?".to_string());
    lines.push(format!("Total: {} ETH", total));
    lines
}

pub fn print_cart(cart: &Cart) {
    if cart.is_empty() {
        println!("{}", "Your cart is empty.".dimmed());
        return;
    }
    for line in cart_lines(cart) {
        println!("{}", line);
    }
}

pub fn pending_row(entry: &PendingWrite) -> String {
    format!(
        "{}  {:<8} {:<15} {:<15} {:<18} {}",
        entry.id,
        entry.kind.to_string(),
        entry.status.to_string(),
        entry.doc_id,
        entry.tx_hash.as_deref().map(short_hash).unwrap_or_else(|| "-".to_string()),
        entry.error.as_deref().unwrap_or("")
    )
}

/// Yellow banner shown whenever the wallet is on an unexpected chain.
pub fn print_chain_warning(warning: Option<String>) {
    if let Some(warning) = warning {
        eprintln!("{} {}", "⚠".yellow().bold(), warning.yellow());
    }
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docmarket_core::CartItem;
    use docmarket_market::models::NewDocument;
    use std::str::FromStr;

    fn doc(title: &str, active: bool) -> Document {
        let mut doc = NewDocument {
            id: 1_767_225_600_000,
            title: title.to_string(),
            description: "desc".to_string(),
            seller: "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".to_string(),
            price_per_token: FromStr::from_str("0.010000000000000000").unwrap(),
            amount: 3,
            file_url: "https://files.test/documents/1.pdf".to_string(),
            file_hash: None,
        }
        .into_document(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        doc.is_active = active;
        doc
    }

    #[test]
    fn test_clip() {
        assert_eq!(clip("short", 10), "short");
        assert_eq!(clip("a much longer title", 10), "a much ...");
        assert_eq!(clip("ünïcödé ünïcödé", 8), "ünïcö...");
    }

    #[test]
    fn test_short_hash() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(short_hash(&hash), "0xabababab...abab");
        assert_eq!(short_hash("0x01"), "0x01");
    }

    #[test]
    fn test_document_row_trims_price_and_address() {
        let row = document_row(&doc("Guide", true));
        assert!(row.starts_with("1767225600000"));
        assert!(row.contains(" 0.01 "));
        assert!(row.contains("0x5aae...eaed"));
        assert!(row.ends_with("active"));

        assert!(document_row(&doc("Guide", false)).ends_with("inactive"));
    }

    #[test]
    fn test_cart_lines_include_total() {
        let mut cart = Cart::new();
        cart.add(CartItem {
            doc_id: 7,
            title: "Atlas".to_string(),
            seller: "0x00000000000000000000000000000000000000aa".to_string(),
            price_per_unit: "0.25".to_string(),
            amount: 5,
            quantity: 2,
        });
        let lines = cart_lines(&cart);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Atlas"));
        assert!(lines[0].ends_with("0.5"));
        assert_eq!(lines[1], "Total: 0.5 ETH");
    }
}
