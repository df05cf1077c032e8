use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use tailor_inventory::{
    config::{self, AppConfig},
    db::{self, DbPool},
    events::{self, EventHandler, LoggingEventHandler},
    models::{FabricAllocation, FabricRoll, FabricRollPatch, RollStatus},
    services::{AllocateInventoryRequest, AllocationOutcome, ReceiveRollRequest, RollLedger},
    InventoryServices,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    let result = run(&context, cli).await;
    context.shutdown().await;
    result
}

async fn run(context: &CliContext, cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Fabric(command) => {
            handle_fabric_command(context, require_tenant(cli.tenant)?, command, cli.json).await?
        }
        Commands::Rolls(command) => {
            handle_rolls_command(context, require_tenant(cli.tenant)?, command, cli.json).await?
        }
        Commands::Allocate(args) => {
            handle_allocate(context, require_tenant(cli.tenant)?, args, cli.json).await?
        }
        Commands::Release(args) => {
            handle_release(context, require_tenant(cli.tenant)?, args, cli.json).await?
        }
        Commands::Allocations(command) => {
            handle_allocations_command(context, require_tenant(cli.tenant)?, command, cli.json)
                .await?
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "tailor-inventory",
    about = "Fabric roll inventory and allocation",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(long, global = true, help = "Tenant identifier (UUID) every command is scoped to")]
    tenant: Option<Uuid>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Fabric(FabricCommands),
    #[command(subcommand)]
    Rolls(RollsCommands),
    /// Allocate fabric length to an order
    Allocate(AllocateArgs),
    /// Release one allocation, or every releasable allocation of an order
    Release(ReleaseArgs),
    #[command(subcommand)]
    Allocations(AllocationsCommands),
}

#[derive(Subcommand)]
enum FabricCommands {
    /// Register a fabric in the tenant catalog
    Add(FabricAddArgs),
}

#[derive(Args)]
struct FabricAddArgs {
    #[arg(long, help = "Display name of the fabric")]
    name: String,
    #[arg(long, help = "Optional SKU")]
    sku: Option<String>,
}

#[derive(Subcommand)]
enum RollsCommands {
    /// Record the receipt of a roll
    Receive(RollReceiveArgs),
    /// List the rolls of a fabric, newest first
    List(RollListArgs),
    /// Correct a roll's number, width, location or notes
    Update(RollUpdateArgs),
    /// Mark a roll as damaged
    Damage(RollIdArgs),
    /// Delete a roll that was never allocated from
    Remove(RollIdArgs),
    /// Compare a roll's consumed length with its allocations
    Ledger(RollIdArgs),
}

#[derive(Args)]
struct RollReceiveArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Fabric identifier (UUID)")]
    fabric: Uuid,
    #[arg(long, help = "Roll number, unique per tenant")]
    number: String,
    #[arg(long, value_parser = parse_decimal, help = "Received length in meters")]
    length: Decimal,
    #[arg(long, value_parser = parse_decimal, help = "Width in centimeters")]
    width: Option<Decimal>,
    #[arg(long, help = "Supplier lot number")]
    lot: Option<String>,
    #[arg(long, help = "Storage location")]
    location: Option<String>,
    #[arg(long, help = "Free-form notes")]
    notes: Option<String>,
}

#[derive(Args)]
struct RollListArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Fabric identifier (UUID)")]
    fabric: Uuid,
    #[arg(long, value_parser = parse_roll_status, help = "Only rolls in this status")]
    status: Option<RollStatus>,
}

#[derive(Args)]
struct RollUpdateArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Roll identifier (UUID)")]
    id: Uuid,
    #[arg(long, help = "New roll number, unique per tenant")]
    number: Option<String>,
    #[arg(long, value_parser = parse_decimal, help = "Width in centimeters")]
    width: Option<Decimal>,
    #[arg(long, help = "Storage location")]
    location: Option<String>,
    #[arg(long, help = "Free-form notes")]
    notes: Option<String>,
}

#[derive(Args)]
struct RollIdArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Roll identifier (UUID)")]
    id: Uuid,
}

#[derive(Args)]
struct AllocateArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order identifier (UUID)")]
    order: Uuid,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order item identifier (UUID)")]
    item: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Fabric identifier (UUID)")]
    fabric: Uuid,
    #[arg(long, value_parser = parse_decimal, help = "Required length in meters")]
    length: Decimal,
    #[arg(long, help = "FIFO, LIFO or BEST_FIT")]
    strategy: Option<String>,
    #[arg(long, help = "Free-form notes")]
    notes: Option<String>,
}

#[derive(Args)]
struct ReleaseArgs {
    #[arg(
        long,
        value_parser = clap::value_parser!(Uuid),
        conflicts_with = "order",
        required_unless_present = "order",
        help = "Allocation identifier (UUID)"
    )]
    allocation: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Order identifier (UUID)")]
    order: Option<Uuid>,
}

#[derive(Subcommand)]
enum AllocationsCommands {
    /// List allocations of an order, or the active allocations of a roll
    List(AllocationListArgs),
    /// Confirm a reserved allocation
    Confirm(AllocationIdArgs),
    /// Record the cut of an allocation
    Cut(AllocationCutArgs),
}

#[derive(Args)]
struct AllocationListArgs {
    #[arg(
        long,
        value_parser = clap::value_parser!(Uuid),
        conflicts_with = "roll",
        required_unless_present = "roll",
        help = "Order identifier (UUID)"
    )]
    order: Option<Uuid>,
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Roll identifier (UUID)")]
    roll: Option<Uuid>,
}

#[derive(Args)]
struct AllocationIdArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Allocation identifier (UUID)")]
    id: Uuid,
}

#[derive(Args)]
struct AllocationCutArgs {
    #[arg(long, value_parser = clap::value_parser!(Uuid), help = "Allocation identifier (UUID)")]
    id: Uuid,
    #[arg(long, value_parser = parse_decimal, help = "Meters actually used")]
    used: Decimal,
    #[arg(long, value_parser = parse_decimal, default_value = "0", help = "Offcut meters left")]
    remnant: Decimal,
}

struct CliContext {
    _config: AppConfig,
    db: Arc<DbPool>,
    services: InventoryServices,
    event_task: JoinHandle<()>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        if config.auto_migrate {
            db::run_migrations(&db)
                .await
                .context("failed to run migrations")?;
        }

        let (event_tx, event_rx) = events::channel(config.event_channel_capacity);
        let event_sender = Arc::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            vec![Arc::new(LoggingEventHandler) as Arc<dyn EventHandler>],
        ));

        let services = InventoryServices::new(db.clone(), &config, event_sender);
        debug!(target: "tailor_inventory_cli", "cli context ready");

        Ok(Self {
            _config: config,
            db,
            services,
            event_task,
        })
    }

    /// Drops the services, which hold the last event senders, and waits for
    /// queued events to be handled.
    async fn shutdown(self) {
        let Self {
            services,
            event_task,
            ..
        } = self;
        drop(services);
        if let Err(e) = event_task.await {
            warn!(target: "tailor_inventory_cli", error = %e, "event processing task failed");
        }
    }
}

async fn handle_fabric_command(
    context: &CliContext,
    tenant: Uuid,
    command: FabricCommands,
    json: bool,
) -> Result<()> {
    match command {
        FabricCommands::Add(args) => {
            let id = context
                .services
                .rolls
                .register_fabric(tenant, &args.name, args.sku)
                .await
                .context("failed to register fabric")?;
            if json {
                print_json(&serde_json::json!({ "fabric_id": id }))?;
            } else {
                println!("Fabric {} registered as {}", args.name, id);
            }
            Ok(())
        }
    }
}

async fn handle_rolls_command(
    context: &CliContext,
    tenant: Uuid,
    command: RollsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.rolls;
    match command {
        RollsCommands::Receive(args) => {
            let request = ReceiveRollRequest {
                width: args.width,
                supplier_lot_no: args.lot,
                location: args.location,
                notes: args.notes,
                ..ReceiveRollRequest::new(tenant, args.fabric, args.number, args.length)
            };
            let roll = service
                .receive_roll(request)
                .await
                .context("failed to receive roll")?;
            output(json, &roll, render_roll)
        }
        RollsCommands::List(args) => {
            let rolls = service
                .list_rolls(tenant, args.fabric, args.status)
                .await
                .with_context(|| format!("failed to list rolls of fabric {}", args.fabric))?;
            if json {
                return print_json(&rolls);
            }
            if rolls.is_empty() {
                println!("No rolls found");
            }
            for roll in &rolls {
                render_roll(roll);
            }
            Ok(())
        }
        RollsCommands::Update(args) => {
            let patch = FabricRollPatch {
                roll_number: args.number,
                width: args.width,
                location: args.location,
                notes: args.notes,
            };
            let roll = service
                .update_roll_details(tenant, args.id, patch)
                .await
                .with_context(|| format!("failed to update roll {}", args.id))?;
            output(json, &roll, render_roll)
        }
        RollsCommands::Damage(args) => {
            let roll = service
                .mark_roll_damaged(tenant, args.id)
                .await
                .with_context(|| format!("failed to mark roll {} damaged", args.id))?;
            output(json, &roll, render_roll)
        }
        RollsCommands::Remove(args) => {
            service
                .remove_roll(tenant, args.id)
                .await
                .with_context(|| format!("failed to remove roll {}", args.id))?;
            println!("Roll {} removed", args.id);
            Ok(())
        }
        RollsCommands::Ledger(args) => {
            let ledger = context
                .services
                .allocations
                .roll_ledger(tenant, args.id)
                .await
                .with_context(|| format!("failed to build ledger for roll {}", args.id))?;
            output(json, &ledger, render_ledger)
        }
    }
}

async fn handle_allocate(
    context: &CliContext,
    tenant: Uuid,
    args: AllocateArgs,
    json: bool,
) -> Result<()> {
    let request = AllocateInventoryRequest {
        order_item_id: args.item,
        strategy: args.strategy,
        notes: args.notes,
        ..AllocateInventoryRequest::new(tenant, args.order, args.fabric, args.length)
    };
    let outcome = context
        .services
        .allocations
        .allocate_inventory(request)
        .await
        .with_context(|| format!("failed to allocate fabric to order {}", args.order))?;
    output(json, &outcome, render_outcome)
}

async fn handle_release(
    context: &CliContext,
    tenant: Uuid,
    args: ReleaseArgs,
    json: bool,
) -> Result<()> {
    let service = &context.services.allocations;
    match (args.allocation, args.order) {
        (Some(allocation_id), _) => {
            service
                .release_allocation(tenant, allocation_id)
                .await
                .with_context(|| format!("failed to release allocation {}", allocation_id))?;
            if json {
                print_json(&serde_json::json!({ "released": [allocation_id] }))
            } else {
                println!("Allocation {} released", allocation_id);
                Ok(())
            }
        }
        (None, Some(order_id)) => {
            let released = service
                .release_order_allocations(tenant, order_id)
                .await
                .with_context(|| format!("failed to release allocations of order {}", order_id))?;
            if json {
                print_json(&serde_json::json!({ "released": released }))
            } else {
                println!("Released {} allocation(s) of order {}", released.len(), order_id);
                Ok(())
            }
        }
        (None, None) => Err(anyhow!("either --allocation or --order is required")),
    }
}

async fn handle_allocations_command(
    context: &CliContext,
    tenant: Uuid,
    command: AllocationsCommands,
    json: bool,
) -> Result<()> {
    let service = &context.services.allocations;
    match command {
        AllocationsCommands::List(args) => {
            let allocations = match (args.order, args.roll) {
                (Some(order_id), _) => service
                    .list_order_allocations(tenant, order_id)
                    .await
                    .with_context(|| format!("failed to list allocations of order {}", order_id))?,
                (None, Some(roll_id)) => service
                    .list_active_roll_allocations(tenant, roll_id)
                    .await
                    .with_context(|| format!("failed to list allocations of roll {}", roll_id))?,
                (None, None) => return Err(anyhow!("either --order or --roll is required")),
            };
            if json {
                return print_json(&allocations);
            }
            if allocations.is_empty() {
                println!("No allocations found");
            }
            for allocation in &allocations {
                render_allocation(allocation);
            }
            Ok(())
        }
        AllocationsCommands::Confirm(args) => {
            let allocation = service
                .confirm_allocation(tenant, args.id)
                .await
                .with_context(|| format!("failed to confirm allocation {}", args.id))?;
            output(json, &allocation, render_allocation)
        }
        AllocationsCommands::Cut(args) => {
            let allocation = service
                .mark_allocation_cut(tenant, args.id, args.used, args.remnant)
                .await
                .with_context(|| format!("failed to record cut of allocation {}", args.id))?;
            output(json, &allocation, render_allocation)
        }
    }
}

fn output<T: Serialize>(json: bool, value: &T, render: fn(&T)) -> Result<()> {
    if json {
        print_json(value)
    } else {
        render(value);
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_roll(roll: &FabricRoll) {
    println!(
        "{}  {:<20} {:>10}m / {:>10}m  {}  ({})",
        roll.id,
        roll.roll_number,
        roll.current_length,
        roll.initial_length,
        roll.status,
        roll.location.as_deref().unwrap_or("-")
    );
}

fn render_allocation(allocation: &FabricAllocation) {
    println!(
        "{}  order {}  roll {}  {:>10}m  {}",
        allocation.id,
        allocation.order_id,
        allocation.fabric_roll_id,
        allocation.allocated_length,
        allocation.status
    );
}

fn render_outcome(outcome: &AllocationOutcome) {
    println!(
        "Allocated {}m using {} ({} roll(s), {}m short)",
        outcome.total_allocated,
        outcome.strategy,
        outcome.allocations.len(),
        outcome.remaining_needed
    );
    for allocation in &outcome.allocations {
        render_allocation(allocation);
    }
}

fn render_ledger(ledger: &RollLedger) {
    println!("Roll {} ({})", ledger.roll_number, ledger.roll_id);
    println!("  initial:    {}m", ledger.initial_length);
    println!("  current:    {}m", ledger.current_length);
    println!("  consumed:   {}m", ledger.consumed_length);
    println!(
        "  allocated:  {}m across {} allocation(s)",
        ledger.allocated_length, ledger.active_allocations
    );
    println!(
        "  drift:      {}m{}",
        ledger.drift,
        if ledger.balanced { "" } else { "  (unbalanced)" }
    );
}

fn require_tenant(tenant: Option<Uuid>) -> Result<Uuid> {
    tenant.ok_or_else(|| anyhow!("--tenant is required for this command"))
}

fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw).map_err(|_| format!("invalid decimal '{raw}'"))
}

fn parse_roll_status(raw: &str) -> Result<RollStatus, String> {
    RollStatus::from_str(&raw.trim().to_ascii_uppercase())
        .map_err(|_| format!("invalid roll status '{raw}'"))
}
