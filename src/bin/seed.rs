use clap::Parser;
use cooperative::{
    domain::{AmountPolicy, CreateMemberRequest, FeeRule, FeeType, MemberRole, NewFeeApplication},
    repository::{FeeRepository, MemberRepository, SqliteFeeRepository, SqliteMemberRepository},
};
use chrono::{Duration, Utc};
use fake::{faker::name::en::Name, Fake};
use rust_decimal::Decimal;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "seed", about = "Fill a cooperative database with demo members and fees")]
struct Args {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://cooperative.db?mode=rwc")]
    database_url: String,

    /// Extra members with random names, each owing a few fees.
    #[arg(long, default_value_t = 10)]
    members: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    println!("🌱 Starting database seeding...");

    let db_pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await?;

    // Run migrations first
    println!("📋 Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let member_repo = SqliteMemberRepository::new(db_pool.clone());
    let fee_repo = SqliteFeeRepository::new(db_pool.clone());

    // Seed members
    println!("👥 Creating members...");

    member_repo.create(CreateMemberRequest {
        email: "admin@cooperative.local".to_string(),
        full_name: "Cooperative Admin".to_string(),
        phone_number: Some("0788000001".to_string()),
        role: MemberRole::Admin,
        password: "admin123".to_string(),
    }).await?;
    println!("  ✅ Created admin user (admin@cooperative.local / admin123)");

    let zone_leader = member_repo.create(CreateMemberRequest {
        email: "zone.leader@cooperative.local".to_string(),
        full_name: "Jeanne Uwase".to_string(),
        phone_number: Some("0788000002".to_string()),
        role: MemberRole::ZoneLeader,
        password: "password123".to_string(),
    }).await?;

    let unit_leader = member_repo.create(CreateMemberRequest {
        email: "unit.leader@cooperative.local".to_string(),
        full_name: "Eric Habimana".to_string(),
        phone_number: Some("0788000003".to_string()),
        role: MemberRole::UnitLeader,
        password: "password123".to_string(),
    }).await?;

    let farmer = member_repo.create(CreateMemberRequest {
        email: "farmer@cooperative.local".to_string(),
        full_name: "Alice Mukamana".to_string(),
        phone_number: Some("0788123456".to_string()),
        role: MemberRole::Member,
        password: "password123".to_string(),
    }).await?;

    let mut members = vec![zone_leader, unit_leader, farmer];
    for i in 0..args.members {
        let full_name: String = Name().fake();
        let phone_suffix: u32 = (100_000..999_999).fake();
        let member = member_repo.create(CreateMemberRequest {
            email: format!("member{}@cooperative.local", i + 1),
            full_name,
            phone_number: Some(format!("078{}", phone_suffix)),
            role: MemberRole::Member,
            password: "password123".to_string(),
        }).await?;
        members.push(member);
    }
    println!("  ✅ Created {} members (password: password123)", members.len());

    // Seed fee rules
    println!("🧾 Creating fee rules...");

    let membership = fee_repo.create_rule(FeeRule {
        id: Uuid::new_v4(),
        name: "Annual membership".to_string(),
        description: Some("Yearly cooperative membership contribution".to_string()),
        fee_type: FeeType::Recurring,
        amount_policy: AmountPolicy::Fixed(Decimal::from(5000)),
        created_at: Utc::now(),
    }).await?;

    let land = fee_repo.create_rule(FeeRule {
        id: Uuid::new_v4(),
        name: "Land levy".to_string(),
        description: Some("Seasonal levy per hectare farmed".to_string()),
        fee_type: FeeType::Recurring,
        amount_policy: AmountPolicy::PerHectare(Decimal::from(12500)),
        created_at: Utc::now(),
    }).await?;

    let seeds = fee_repo.create_rule(FeeRule {
        id: Uuid::new_v4(),
        name: "Seed distribution".to_string(),
        description: None,
        fee_type: FeeType::OneOff,
        amount_policy: AmountPolicy::Fixed(Decimal::new(750050, 2)),
        created_at: Utc::now(),
    }).await?;

    println!("  ✅ Created 3 fee rules");

    // Apply fees: one overdue, one due soon, and a one-off for every other member
    println!("💰 Applying fees...");

    let today = Utc::now().date_naive();
    let mut applied = 0;
    for (i, member) in members.iter().enumerate() {
        fee_repo.apply(NewFeeApplication {
            member_id: member.id,
            fee_rule_id: membership.id,
            amount: membership.amount_policy.amount_for(Decimal::ONE),
            due_date: today - Duration::days(15),
        }).await?;

        let hectares = Decimal::new((5..40).fake::<i64>(), 1);
        fee_repo.apply(NewFeeApplication {
            member_id: member.id,
            fee_rule_id: land.id,
            amount: land.amount_policy.amount_for(hectares),
            due_date: today + Duration::days(30),
        }).await?;
        applied += 2;

        if i % 2 == 0 {
            fee_repo.apply(NewFeeApplication {
                member_id: member.id,
                fee_rule_id: seeds.id,
                amount: seeds.amount_policy.amount_for(Decimal::ONE),
                due_date: today + Duration::days(7),
            }).await?;
            applied += 1;
        }
    }

    println!("  ✅ Applied {} fees", applied);

    println!("\n✨ Database seeding completed successfully!");
    println!("\n📝 Test credentials:");
    println!("  Admin:  admin@cooperative.local / admin123");
    println!("  Member: farmer@cooperative.local / password123");

    Ok(())
}
