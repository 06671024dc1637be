//! Rule-based support chatbot.
//!
//! A message is classified into an [`Intent`] by keyword and regex rules,
//! checked in a fixed order. Intents that need data ask a [`ChatKnowledge`]
//! source; everything else is a canned Markdown reply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::aggregates::OrderStatus;
use crate::domain::value_objects::Money;

const SEARCH_STOP_WORDS: &[&str] = &["available", "in", "stock", "do", "you", "have", "find", "search", "for", "is", "the", "a", "any", "me"];
const PRICE_STOP_WORDS: &[&str] = &["price", "cost", "how", "much", "of", "the", "is", "a", "for", "what"];

pub const SEARCH_LIMIT: i64 = 5;
pub const RECENT_ORDERS_LIMIT: i64 = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    TrackOrder(Option<String>),
    ProductSearch(String),
    PriceQuery(String),
    Categories,
    Greeting,
    Help,
    Delivery,
    Returns,
    Fallback,
}

/// Compiled matching rules.
#[derive(Clone, Debug)]
pub struct Classifier {
    order_ref: Regex,
    track_ref: Regex,
    greeting: Regex,
}

impl Classifier {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            order_ref: Regex::new(r"(?i)order\s*#?\s*([A-Z0-9-]+)")?,
            track_ref: Regex::new(r"(?i)track\s+([A-Z0-9-]+)")?,
            greeting: Regex::new(r"^(hi|hello|hey|good\s*(morning|afternoon|evening)|howdy)")?,
        })
    }

    pub fn classify(&self, message: &str) -> Intent {
        let msg = message.trim().to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if let Some(number) = self.order_number(&msg) {
            return Intent::TrackOrder(Some(number));
        }
        if has(&["order status", "track my order", "where is my order"]) {
            return Intent::TrackOrder(None);
        }
        if has(&["available", "in stock", "do you have", "find", "search"]) {
            return Intent::ProductSearch(search_terms(&msg, SEARCH_STOP_WORDS));
        }
        if has(&["price", "cost", "how much"]) {
            return Intent::PriceQuery(search_terms(&msg, PRICE_STOP_WORDS));
        }
        if has(&["categories", "what do you sell", "what parts"]) {
            return Intent::Categories;
        }
        if self.greeting.is_match(&msg) {
            return Intent::Greeting;
        }
        if msg.contains("help") || msg == "?" {
            return Intent::Help;
        }
        if has(&["delivery", "shipping", "how long"]) {
            return Intent::Delivery;
        }
        if has(&["return", "refund", "exchange"]) {
            return Intent::Returns;
        }
        Intent::Fallback
    }

    /// Order numbers always carry digits, so words like "status" never count.
    fn order_number(&self, msg: &str) -> Option<String> {
        [&self.order_ref, &self.track_ref]
            .into_iter()
            .filter_map(|re| re.captures(msg))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_uppercase()))
            .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
    }
}

fn search_terms(msg: &str, stop_words: &[&str]) -> String {
    msg.split_whitespace()
        .filter(|w| !stop_words.contains(w) && w.chars().count() > 2)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct OrderSummary {
    pub order_number: String,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub item_count: i64,
    pub tracking_number: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, sqlx::FromRow)]
pub struct ProductHit {
    pub name: String,
    pub brand: String,
    pub price: Decimal,
    pub compare_price: Option<Decimal>,
    pub stock: i32,
}

/// Catalog and order lookups the bot relies on.
#[async_trait]
pub trait ChatKnowledge: Send + Sync {
    async fn find_order(&self, customer_id: Uuid, order_number: &str) -> anyhow::Result<Option<OrderSummary>>;
    async fn recent_orders(&self, customer_id: Uuid, limit: i64) -> anyhow::Result<Vec<OrderSummary>>;
    /// Active, in-stock products matching any of the terms.
    async fn search_products(&self, terms: &str, limit: i64) -> anyhow::Result<Vec<ProductHit>>;
    /// Best active match for a price question, in stock or not.
    async fn price_lookup(&self, terms: &str) -> anyhow::Result<Option<ProductHit>>;
}

/// `brake pads?` -> `brake | pads`; `None` when nothing searchable remains.
pub fn or_tsquery(terms: &str) -> Option<String> {
    let words: Vec<&str> = terms
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    (!words.is_empty()).then(|| words.join(" | "))
}

pub struct PgKnowledge {
    db: PgPool,
}

impl PgKnowledge {
    pub fn new(db: PgPool) -> Self { Self { db } }
}

const ORDER_SUMMARY_COLUMNS: &str = "order_number, status, total_amount, jsonb_array_length(items)::BIGINT AS item_count, tracking_number, estimated_delivery";

#[async_trait]
impl ChatKnowledge for PgKnowledge {
    async fn find_order(&self, customer_id: Uuid, order_number: &str) -> anyhow::Result<Option<OrderSummary>> {
        let sql = format!("SELECT {ORDER_SUMMARY_COLUMNS} FROM orders WHERE order_number = $1 AND customer_id = $2");
        Ok(sqlx::query_as::<_, OrderSummary>(&sql).bind(order_number).bind(customer_id).fetch_optional(&self.db).await?)
    }

    async fn recent_orders(&self, customer_id: Uuid, limit: i64) -> anyhow::Result<Vec<OrderSummary>> {
        let sql = format!("SELECT {ORDER_SUMMARY_COLUMNS} FROM orders WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2");
        Ok(sqlx::query_as::<_, OrderSummary>(&sql).bind(customer_id).bind(limit).fetch_all(&self.db).await?)
    }

    async fn search_products(&self, terms: &str, limit: i64) -> anyhow::Result<Vec<ProductHit>> {
        let Some(query) = or_tsquery(terms) else { return Ok(Vec::new()) };
        let hits = sqlx::query_as::<_, ProductHit>(
            "SELECT name, brand, price, compare_price, stock FROM products \
             WHERE search_vector @@ to_tsquery('english', $1) AND is_active AND stock > 0 \
             ORDER BY ts_rank(search_vector, to_tsquery('english', $1)) DESC LIMIT $2",
        )
        .bind(&query)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(hits)
    }

    async fn price_lookup(&self, terms: &str) -> anyhow::Result<Option<ProductHit>> {
        let Some(query) = or_tsquery(terms) else { return Ok(None) };
        let hit = sqlx::query_as::<_, ProductHit>(
            "SELECT name, brand, price, compare_price, stock FROM products \
             WHERE search_vector @@ to_tsquery('english', $1) AND is_active \
             ORDER BY ts_rank(search_vector, to_tsquery('english', $1)) DESC LIMIT 1",
        )
        .bind(&query)
        .fetch_optional(&self.db)
        .await?;
        Ok(hit)
    }
}

/// Answers one message for `user_id`.
pub async fn respond(classifier: &Classifier, message: &str, user_id: Uuid, knowledge: &dyn ChatKnowledge) -> anyhow::Result<String> {
    let reply = match classifier.classify(message) {
        Intent::TrackOrder(Some(number)) => match knowledge.find_order(user_id, &number).await? {
            Some(order) => render_order(&order),
            None => format!("I couldn't find order #{number}. Please check the order number and try again."),
        },
        Intent::TrackOrder(None) => render_recent_orders(&knowledge.recent_orders(user_id, RECENT_ORDERS_LIMIT).await?),
        Intent::ProductSearch(terms) if terms.is_empty() => {
            "What product are you looking for? Tell me the part name, brand, or vehicle type!".to_string()
        }
        Intent::ProductSearch(terms) => render_search(&terms, &knowledge.search_products(&terms, SEARCH_LIMIT).await?),
        Intent::PriceQuery(terms) => {
            let hit = if terms.is_empty() { None } else { knowledge.price_lookup(&terms).await? };
            match hit {
                Some(product) => render_price(&product),
                None => "Which product's price would you like to know? Tell me the name or part number!".to_string(),
            }
        }
        Intent::Categories => CATEGORIES_REPLY.to_string(),
        Intent::Greeting => GREETING_REPLY.to_string(),
        Intent::Help => HELP_REPLY.to_string(),
        Intent::Delivery => DELIVERY_REPLY.to_string(),
        Intent::Returns => RETURNS_REPLY.to_string(),
        Intent::Fallback => FALLBACK_REPLY.to_string(),
    };
    Ok(reply)
}

fn status_emoji(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Placed => "📦",
        OrderStatus::Confirmed => "✅",
        OrderStatus::Shipped => "🚚",
        OrderStatus::Delivered => "🎉",
        OrderStatus::Cancelled => "❌",
        _ => "📋",
    }
}

pub fn render_order(order: &OrderSummary) -> String {
    let mut out = format!(
        "{} **Order #{}**\nStatus: **{}**\nTotal: {}\nItems: {}\n",
        status_emoji(order.status),
        order.order_number,
        order.status.as_str().to_uppercase(),
        Money::inr(order.total_amount),
        order.item_count
    );
    if let Some(tracking) = &order.tracking_number {
        out.push_str(&format!("Tracking: {tracking}\n"));
    }
    if let Some(eta) = order.estimated_delivery {
        out.push_str(&format!("ETA: {}", eta.format("%d/%m/%Y")));
    }
    out
}

pub fn render_recent_orders(orders: &[OrderSummary]) -> String {
    if orders.is_empty() {
        return "You don't have any orders yet. Browse our products and place your first order!".to_string();
    }
    let list = orders
        .iter()
        .map(|o| format!("• #{} — {} — {}", o.order_number, o.status.as_str().to_uppercase(), Money::inr(o.total_amount)))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Here are your recent orders:\n{list}\n\nAsk me about a specific order using its number!")
}

pub fn render_search(terms: &str, products: &[ProductHit]) -> String {
    if products.is_empty() {
        return format!("Sorry, I couldn't find products matching \"{terms}\". Try different keywords or browse our categories!");
    }
    let list = products
        .iter()
        .map(|p| format!("• **{}** ({}) — {} — {} in stock", p.name, p.brand, Money::inr(p.price), p.stock))
        .collect::<Vec<_>>()
        .join("\n");
    format!("Found {} matching product(s):\n{list}\n\nWould you like more details on any of these?", products.len())
}

pub fn render_price(product: &ProductHit) -> String {
    let mut out = format!("**{}** ({})\nPrice: {}", product.name, product.brand, Money::inr(product.price));
    if let Some(mrp) = product.compare_price {
        out.push_str(&format!(" (MRP: {})", Money::inr(mrp)));
    }
    let availability = if product.stock > 0 { format!("{} in stock ✅", product.stock) } else { "Out of stock ❌".to_string() };
    out.push_str(&format!("\nAvailability: {availability}"));
    out
}

const CATEGORIES_REPLY: &str = "🔧 We sell spare parts for **bikes** and **cars**!\n\nCategories include:\n• Engine Parts\n• Brake Systems\n• Electrical Components\n• Body Parts\n• Suspension\n• Filters & Fluids\n• Transmission\n\nUse the search bar or browse by category to find what you need!";

const GREETING_REPLY: &str = "Hello! 👋 Welcome to SparePartsHub! I can help you with:\n\n• 🔍 **Finding products** — \"Do you have brake pads for Honda?\"\n• 📦 **Order tracking** — \"Track order #SPH-12345\"\n• 💰 **Pricing** — \"How much is a clutch plate?\"\n• 📂 **Categories** — \"What parts do you sell?\"\n\nHow can I help you today?";

const HELP_REPLY: &str = "Here's what I can do:\n\n• 🔍 **Search products** — Ask about availability or search for parts\n• 📦 **Track orders** — Give me your order number\n• 💰 **Check prices** — Ask about any product's price\n• 📂 **Browse categories** — See what we offer\n• 📞 **Support** — File a complaint through your dashboard\n\nJust type your question naturally!";

const DELIVERY_REPLY: &str = "🚚 **Delivery Information:**\n\n• Standard delivery: 3-7 business days\n• Shipping is calculated at checkout based on your location\n• You'll receive tracking updates via email\n• Cash on Delivery (COD) available!\n\nWant to track a specific order? Give me the order number!";

const RETURNS_REPLY: &str = "🔄 **Returns & Refunds:**\n\n• Returns accepted within 7 days of delivery\n• Product must be unused and in original packaging\n• File a complaint through your dashboard for refund requests\n• Refunds are processed within 5-7 business days\n\nNeed to file a complaint? Go to Dashboard → Complaints → New Complaint.";

const FALLBACK_REPLY: &str = "I'm not sure I understand. I can help you with:\n\n• Finding products and checking availability\n• Tracking your orders\n• Price information\n• General questions about our services\n\nTry asking something like \"Do you have brake pads?\" or \"Track order #SPH-12345\"!";

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn classifier() -> Classifier { Classifier::new().unwrap() }

    #[test]
    fn test_order_intents() {
        let c = classifier();
        assert_eq!(c.classify("Where is order #sph-240601-ab12c?"), Intent::TrackOrder(Some("SPH-240601-AB12C".into())));
        assert_eq!(c.classify("track SPH-240601-XYZ12"), Intent::TrackOrder(Some("SPH-240601-XYZ12".into())));
        assert_eq!(c.classify("What is my order status"), Intent::TrackOrder(None));
        assert_eq!(c.classify("track my order please"), Intent::TrackOrder(None));
        assert_eq!(c.classify("where is my order"), Intent::TrackOrder(None));
    }

    #[test]
    fn test_search_and_price_terms() {
        let c = classifier();
        assert_eq!(c.classify("Do you have brake pads for Honda?"), Intent::ProductSearch("brake pads honda?".into()));
        assert_eq!(c.classify("is it available"), Intent::ProductSearch(String::new()));
        assert_eq!(c.classify("What is the price of clutch plate"), Intent::PriceQuery("clutch plate".into()));
        assert_eq!(c.classify("how much for a spark plug"), Intent::PriceQuery("spark plug".into()));
    }

    #[test]
    fn test_canned_intents_in_order() {
        let c = classifier();
        assert_eq!(c.classify("what parts do you sell"), Intent::Categories);
        assert_eq!(c.classify("Good morning!"), Intent::Greeting);
        assert_eq!(c.classify("hello, i need help"), Intent::Greeting);
        assert_eq!(c.classify("can you help"), Intent::Help);
        assert_eq!(c.classify(" ? "), Intent::Help);
        assert_eq!(c.classify("how long does shipping take"), Intent::Delivery);
        assert_eq!(c.classify("I want a refund"), Intent::Returns);
        assert_eq!(c.classify("blah"), Intent::Fallback);
    }

    #[test]
    fn test_or_tsquery() {
        assert_eq!(or_tsquery("brake pads honda?").as_deref(), Some("brake | pads | honda"));
        assert_eq!(or_tsquery("'); drop--"), Some("drop".to_string()));
        assert_eq!(or_tsquery("?!"), None);
    }

    fn summary(number: &str, status: OrderStatus) -> OrderSummary {
        OrderSummary {
            order_number: number.into(),
            status,
            total_amount: Decimal::new(116_100, 2),
            item_count: 2,
            tracking_number: Some("DTDC123".into()),
            estimated_delivery: DateTime::from_timestamp(1_717_200_000, 0),
        }
    }

    #[test]
    fn test_render_order() {
        let text = render_order(&summary("SPH-240601-AB12C", OrderStatus::Shipped));
        assert_eq!(text, "🚚 **Order #SPH-240601-AB12C**\nStatus: **SHIPPED**\nTotal: ₹1161\nItems: 2\nTracking: DTDC123\nETA: 01/06/2024");
    }

    #[test]
    fn test_render_price() {
        let hit = ProductHit { name: "Clutch Plate".into(), brand: "Exedy".into(), price: Decimal::new(45_000, 2), compare_price: Some(Decimal::new(520, 0)), stock: 0 };
        assert_eq!(render_price(&hit), "**Clutch Plate** (Exedy)\nPrice: ₹450 (MRP: ₹520)\nAvailability: Out of stock ❌");
    }

    #[derive(Default)]
    struct FakeKnowledge {
        orders: Vec<OrderSummary>,
        products: Vec<ProductHit>,
        searched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatKnowledge for FakeKnowledge {
        async fn find_order(&self, _customer_id: Uuid, order_number: &str) -> anyhow::Result<Option<OrderSummary>> {
            Ok(self.orders.iter().find(|o| o.order_number == order_number).cloned())
        }
        async fn recent_orders(&self, _customer_id: Uuid, limit: i64) -> anyhow::Result<Vec<OrderSummary>> {
            Ok(self.orders.iter().take(limit as usize).cloned().collect())
        }
        async fn search_products(&self, terms: &str, _limit: i64) -> anyhow::Result<Vec<ProductHit>> {
            self.searched.lock().unwrap().push(terms.to_string());
            Ok(self.products.clone())
        }
        async fn price_lookup(&self, _terms: &str) -> anyhow::Result<Option<ProductHit>> {
            Ok(self.products.first().cloned())
        }
    }

    #[tokio::test]
    async fn test_respond_with_knowledge() {
        let c = classifier();
        let kb = FakeKnowledge {
            orders: vec![summary("SPH-240601-AB12C", OrderStatus::Placed)],
            products: vec![ProductHit { name: "Brake Pad".into(), brand: "Bosch".into(), price: Decimal::new(450, 0), compare_price: None, stock: 12 }],
            ..Default::default()
        };
        let user = Uuid::now_v7();

        let reply = respond(&c, "track SPH-240601-AB12C", user, &kb).await.unwrap();
        assert!(reply.starts_with("📦 **Order #SPH-240601-AB12C**"));

        let reply = respond(&c, "order #SPH-000000-ZZZZ9", user, &kb).await.unwrap();
        assert_eq!(reply, "I couldn't find order #SPH-000000-ZZZZ9. Please check the order number and try again.");

        let reply = respond(&c, "where is my order", user, &kb).await.unwrap();
        assert!(reply.contains("• #SPH-240601-AB12C — PLACED — ₹1161"));

        let reply = respond(&c, "find bosch brake pad", user, &kb).await.unwrap();
        assert!(reply.starts_with("Found 1 matching product(s):\n• **Brake Pad** (Bosch) — ₹450 — 12 in stock"));
        assert_eq!(kb.searched.lock().unwrap().as_slice(), ["bosch brake pad"]);
    }

    #[tokio::test]
    async fn test_respond_without_data() {
        let c = classifier();
        let kb = FakeKnowledge::default();
        let user = Uuid::now_v7();
        assert!(respond(&c, "order status", user, &kb).await.unwrap().starts_with("You don't have any orders yet."));
        assert_eq!(
            respond(&c, "search xyzzy", user, &kb).await.unwrap(),
            "Sorry, I couldn't find products matching \"xyzzy\". Try different keywords or browse our categories!"
        );
        assert!(respond(&c, "price?", user, &kb).await.unwrap().starts_with("Which product's price"));
        assert_eq!(respond(&c, "hi", user, &kb).await.unwrap(), GREETING_REPLY);
        let reply = respond(&c, "what parts do you sell", user, &kb).await.unwrap();
        assert!(reply.starts_with("🔧 We sell spare parts for **bikes** and **cars**!\n\nCategories include:"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL pointing at Postgres"]
    async fn test_search_matches_tags(db: PgPool) {
        use crate::api::test_support::{insert_product, insert_user};
        use crate::domain::aggregates::Role;

        let dealer = insert_user(&db, Role::Wholesaler).await;
        insert_product(&db, dealer.id, "Lift Pump Assembly", 3, &["hydraulic", "tractor"]).await;
        insert_product(&db, dealer.id, "Wiper Blade", 3, &[]).await;

        let kb = PgKnowledge::new(db);
        let hits = kb.search_products("hydraulic", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Lift Pump Assembly");
        assert_eq!(kb.price_lookup("hydraulic pump").await.unwrap().map(|h| h.name).as_deref(), Some("Lift Pump Assembly"));
    }
}
