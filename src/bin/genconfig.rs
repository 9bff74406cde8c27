use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use num_bigint::BigUint;
use psigen::bloom::ThresholdMode;
use psigen::config::{generate, ConfigRecord, GenerationInputs, GroupParameters};

// 2144-bit prime with p - 1 = 2^56 * f1 * f2 (distinct prime factors 2, f1, f2).
const DEFAULT_P: &str = "1363206533578718249610827093048887952664410988290312252008351212295356071903453053191721401067850577953050410900317350007950525564512418215465080535085457187463795333424852613246274739018555245409052446767070874183043358454906728919810643889294518602756197187913781308017146145779262145982293852772794946820980801967072845336320893003471423526870391995484567076189396114242619729920147931642102439541511031515598645549174556231414882024308509041581359737520189271661009167139154894907145343275552463137237630502284175554502718971483405077487139660591752391907055240725155522920053093730526866930619874074638208946788140726404552618626083803103233";
const DEFAULT_PRIME_FACTOR_1: &str = "23870916256977059453531361624695294206301491530933871368965993398489267262385692719751518695403289250228024815294557892087072686172808442392171962978712098865763355442412048326910238839664117837729118144678419718173824348660408294460045619328381847853242594624470503466830296343277532582816785615504478672667369606094958828109989057237333639717132475195383330682537206838730153477414702742285665834646869445239103049424317802806774967087098667009025873404601797626343803355926635714963789197359427914619564653248259747085900193564090613407423789426904976915673387047428916684038767360101519343024952048719665870312157";
const DEFAULT_PRIME_FACTOR_2: &str = "792524711141";

#[derive(Clone, Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 256)]
    set_size: u64,

    #[arg(long, default_value_t = 0.01)]
    false_positive_rate: f64,

    #[arg(long, default_value_t = 6)]
    number_of_parties: usize,

    #[arg(long, default_value_t = 3)]
    intersection_threshold: u64,

    #[arg(long, default_value_t = 50)]
    benchmark_rounds: u64,

    #[arg(long, default_value_t = 20081)]
    server_port: u16,

    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    #[arg(short, long, default_value_t = String::from(DEFAULT_P))]
    p: String,

    #[arg(long, default_value_t = String::from(DEFAULT_PRIME_FACTOR_1))]
    prime_factor_1: String,

    #[arg(long, default_value_t = String::from(DEFAULT_PRIME_FACTOR_2))]
    prime_factor_2: String,

    #[arg(short, long, default_value_t = String::from("2"))]
    q: String,

    #[arg(long, default_value_t = 56)]
    q_power: u32,

    #[arg(long, value_enum, default_value_t = Mode::Inclusive)]
    threshold_mode: Mode,

    #[arg(long, default_value_t = String::from("config"))]
    out_dir: String,

    #[arg(long, default_value_t = false)]
    no_print: bool,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum Mode {
    Strict,
    Inclusive,
}

impl From<Mode> for ThresholdMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Strict => ThresholdMode::Strict,
            Mode::Inclusive => ThresholdMode::Inclusive,
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let group = GroupParameters {
        modulus: args.p.parse::<BigUint>()?,
        prime_factors: vec![
            args.prime_factor_1.parse::<BigUint>()?,
            args.prime_factor_2.parse::<BigUint>()?,
        ],
        q: args.q.parse::<BigUint>()?,
        q_power: args.q_power,
    };
    let inputs = GenerationInputs {
        set_size: args.set_size,
        false_positive_rate: args.false_positive_rate,
        party_count: args.number_of_parties,
        threshold: args.intersection_threshold,
        benchmark_rounds: args.benchmark_rounds,
        base_port: args.server_port,
        host: args.host.clone(),
        threshold_mode: args.threshold_mode.clone().into(),
        group,
    };

    let records = generate(&inputs, &mut rand::thread_rng())?;

    if !args.no_print {
        print_summary(&inputs, &records[0]);
    }

    let out_dir = Path::new(&args.out_dir);
    clean_dir(out_dir)?;
    for record in &records {
        let path = out_dir.join(format!("{}_config.json", record.local_name));
        fs::write(&path, serde_json::to_string_pretty(record)?)?;
        if !args.no_print {
            println!("write to {}", path.display());
        }
    }

    let script = out_dir.join("run.sh");
    fs::write(&script, launcher_script(&args.out_dir, records.len()))?;
    if !args.no_print {
        println!("write to {}", script.display());
    }
    Ok(())
}

fn print_summary(inputs: &GenerationInputs, record: &ConfigRecord) {
    println!("The set size is: {}", inputs.set_size);
    println!("The false positive rate is: {}", inputs.false_positive_rate);
    println!("The number of parties is: {}", inputs.party_count);
    println!("The intersection threshold is: {}", inputs.threshold);
    println!("The number of benchmark rounds is: {}", inputs.benchmark_rounds);
    println!("The server port starts from: {}", inputs.base_port);
    println!("The q value is: {}", record.q);
    println!("The power of q is: {}", record.q_power);
    println!("The number of bits in p is: {}", inputs.group.modulus.bits());
    println!("The size of bloom filter is: {}", record.bloom_filter_size);
    println!(
        "The number of hash functions is: {}",
        record.number_of_hash_functions
    );
}

/// Removes stale config documents so a failed earlier batch cannot leak into
/// this one.
fn clean_dir(dir: &Path) -> Result<(), std::io::Error> {
    fs::create_dir_all(dir)?;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(path)?;
        }
    }
    Ok(())
}

/// Launcher that starts parties N..2 in the background and the server party
/// in the foreground.
fn launcher_script(out_dir: &str, party_count: usize) -> String {
    let mut script = String::from("#! /bin/bash \n");
    for i in (2..=party_count).rev() {
        let path: PathBuf = [out_dir, &format!("P{}_config.json", i)].iter().collect();
        script.push_str(&format!("./bin/main ./{} & \n", path.display()));
    }
    let path: PathBuf = [out_dir, "P1_config.json"].iter().collect();
    script.push_str(&format!("./bin/main ./{}", path.display()));
    script
}
