//! fleetctl - operator CLI for the fleet orchestrator.
//!
//! Usage:
//!   fleetctl status
//!   fleetctl vehicle CAR_9 car 39.90 116.40 --battery 80
//!   fleetctl task PICKUP_A DROPOFF_B 2.0 --capability air_delivery
//!   fleetctl demo

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use fleet_cli::{demo, FleetClient};
use fleet_core::{
    DeliveryPoint, DeliveryPointKind, NewTask, Position, TaskPriority, TaskStatus, Vehicle, VehicleKind,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Operate a running fleet orchestrator")]
struct Args {
    /// Orchestrator URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the system status
    Status,
    /// Register a vehicle
    Vehicle {
        id: String,
        #[arg(value_enum)]
        kind: KindArg,
        lat: f64,
        lon: f64,
        #[arg(long, default_value_t = 100.0)]
        battery: f64,
        #[arg(long)]
        max_payload: Option<f64>,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
    },
    /// Register a delivery point
    Point {
        id: String,
        #[arg(value_enum)]
        kind: PointArg,
        lat: f64,
        lon: f64,
    },
    /// Create a delivery task
    Task {
        pickup: String,
        delivery: String,
        weight_kg: f64,
        /// Origin drone station; makes the task hybrid
        #[arg(long)]
        station: Option<String>,
        #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
        priority: PriorityArg,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        /// Deadline in minutes from now
        #[arg(long)]
        deadline_min: Option<i64>,
    },
    /// Show one task
    Show { task_id: String },
    /// Cancel a task
    Cancel { task_id: String },
    /// Report task progress on behalf of a controller
    Progress {
        task_id: String,
        /// e.g. pickup_reached, pickup_complete, transfer_complete, completed
        status: String,
    },
    /// Run one scheduling pass now
    Tick,
    /// Load the demo fleet and tasks, then schedule them
    Demo {
        #[arg(long, default_value_t = 39.9042)]
        lat: f64,
        #[arg(long, default_value_t = 116.4074)]
        lon: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Car,
    Drone,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PointArg {
    Pickup,
    Delivery,
    Station,
    Charging,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Normal,
    High,
    Emergency,
}

impl From<KindArg> for VehicleKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Car => VehicleKind::Car,
            KindArg::Drone => VehicleKind::Drone,
        }
    }
}

impl From<PointArg> for DeliveryPointKind {
    fn from(arg: PointArg) -> Self {
        match arg {
            PointArg::Pickup => DeliveryPointKind::Pickup,
            PointArg::Delivery => DeliveryPointKind::Delivery,
            PointArg::Station => DeliveryPointKind::DroneStation,
            PointArg::Charging => DeliveryPointKind::Charging,
        }
    }
}

impl From<PriorityArg> for TaskPriority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Low => TaskPriority::Low,
            PriorityArg::Normal => TaskPriority::Normal,
            PriorityArg::High => TaskPriority::High,
            PriorityArg::Emergency => TaskPriority::Emergency,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let client = FleetClient::new(args.url.clone());

    match args.command {
        Command::Status => print_json(&client.status()?),
        Command::Vehicle { id, kind, lat, lon, battery, max_payload, capabilities } => {
            let mut vehicle = Vehicle::new(id, kind.into(), Position::ground(lat, lon))
                .with_battery(battery)
                .with_capabilities(capabilities);
            if let Some(payload) = max_payload {
                vehicle = vehicle.with_max_payload(payload);
            }
            print_json(&client.register_vehicle(&vehicle)?)
        }
        Command::Point { id, kind, lat, lon } => {
            let point = DeliveryPoint::new(id, kind.into(), Position::ground(lat, lon));
            print_json(&client.register_point(&point)?)
        }
        Command::Task { pickup, delivery, weight_kg, station, priority, capabilities, deadline_min } => {
            let task = NewTask {
                priority: priority.into(),
                pickup_point: pickup,
                delivery_point: delivery,
                drone_station: station,
                weight_kg,
                required_capabilities: capabilities.into_iter().collect(),
                deadline: deadline_min.map(|minutes| Utc::now() + Duration::minutes(minutes)),
                ..NewTask::default()
            };
            print_json(&client.create_task(&task)?)
        }
        Command::Show { task_id } => print_json(&client.get_task(&task_id)?),
        Command::Cancel { task_id } => print_json(&client.cancel_task(&task_id)?),
        Command::Progress { task_id, status } => {
            let status: TaskStatus = serde_json::from_value(serde_json::Value::String(status.clone()))
                .with_context(|| format!("unknown task status '{}'", status))?;
            print_json(&client.report_progress(&task_id, status)?)
        }
        Command::Tick => print_json(&client.tick()?),
        Command::Demo { lat, lon } => run_demo(&client, lat, lon),
    }
}

fn run_demo(client: &FleetClient, lat: f64, lon: f64) -> Result<()> {
    if !client.health()? {
        anyhow::bail!("orchestrator is not healthy");
    }

    let fleet = demo::demo_fleet(lat, lon);
    for point in &fleet.points {
        match client.register_point(point) {
            Ok(point) => println!("Point {} ({:?})", point.id, point.kind),
            Err(err) => eprintln!("Skipping point {}: {:#}", point.id, err),
        }
    }
    for vehicle in &fleet.vehicles {
        match client.register_vehicle(vehicle) {
            Ok(vehicle) => println!("Vehicle {} ({}, {:.0}%)", vehicle.id, vehicle.kind, vehicle.battery_pct),
            Err(err) => eprintln!("Skipping vehicle {}: {:#}", vehicle.id, err),
        }
    }

    let mut created = Vec::new();
    for task in demo::demo_tasks() {
        let task = client.create_task(&task)?;
        println!("Task {} ({} -> {}, hybrid: {})", task.id, task.pickup_point, task.delivery_point, task.is_hybrid());
        created.push(task.id);
    }

    let report = client.tick()?;
    print_json(&report)?;
    for task_id in created {
        let task = client.get_task(&task_id)?;
        println!("{}: {} {:?}", task.id, task.status, task.assigned_vehicles);
    }
    Ok(())
}
