use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use highjump_tracker::clip::Clip;
use highjump_tracker::config::Config;
use highjump_tracker::pipeline::analyze;
use highjump_tracker::pose::PresenceDetector;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

struct Args {
    clip_path: String,
    anchor_frame: usize,
    anchor_candidate: usize,
    config_path: String,
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    // Usage: analyze_clip <clip.json> <anchor_frame> <anchor_candidate> [config.toml]
    if args.len() < 4 {
        bail!("usage: analyze_clip <clip.json> <anchor_frame> <anchor_candidate> [config.toml]");
    }
    Ok(Args {
        clip_path: args[1].clone(),
        anchor_frame: args[2]
            .parse()
            .with_context(|| format!("invalid anchor frame: {}", args[2]))?,
        anchor_candidate: args[3]
            .parse()
            .with_context(|| format!("invalid anchor candidate: {}", args[3]))?,
        config_path: args
            .get(4)
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args()?;
    let config = Config::load_or_default(&args.config_path);
    let clip = Clip::load(&args.clip_path)?;

    println!("=== 跳躍クリップ解析 ===");
    println!("  クリップ: {} ({} フレーム, {} fps)", args.clip_path, clip.frame_count(), clip.fps);
    println!("  アンカー: フレーム {} 候補 {}", args.anchor_frame, args.anchor_candidate);
    println!();

    let presence = clip
        .presence()
        .map(|p| Arc::new(p) as Arc<dyn PresenceDetector>);
    let analysis = analyze(
        (args.anchor_frame, args.anchor_candidate),
        &clip.candidates,
        clip.fps,
        &config,
        presence,
    )?;

    let s = analysis.assignments.summary();
    println!("[1/3] 割り当て");
    println!("  Confirmed: {}  Auto: {}  Uncertain: {}", s.confirmed, s.auto, s.uncertain);
    println!(
        "  NoSubject: {}  SubjectPresentNoPose: {}  RecoverableGap: {}",
        s.no_subject, s.subject_present_no_pose, s.recoverable_gap
    );

    println!("[2/3] 軌道");
    match &analysis.trajectory {
        Some(model) => {
            println!("  R²: {:.4} (アンカー {} 点)", model.r_squared(), model.anchor_count());
            println!("  x係数: {:?}", model.x_coefficients());
            println!("  y係数: {:?}", model.y_coefficients());
        }
        None => println!("  フィットできませんでした"),
    }
    if !analysis.repaired_frames.is_empty() {
        println!("  修復フレーム: {:?}", analysis.repaired_frames);
    }

    let idx = &analysis.events.indices;
    println!("[3/3] イベント");
    println!("  被写体: {:?} 〜 {:?}", idx.first_subject_frame, idx.last_subject_frame);
    println!("  最後から2歩目: {:?}", idx.penultimate);
    println!("  踏み込み: {:?}", idx.plant);
    println!("  踏切: {:?}", idx.toe_off);
    println!("  頂点: {:?}", idx.peak);
    println!("  着地: {:?}", idx.landing);
    if let Some(t) = idx.takeoff_contact_time(clip.fps) {
        println!("  接地時間: {:.3}s", t);
    }
    if let Some(t) = idx.flight_time(clip.fps) {
        println!("  滞空時間: {:.3}s", t);
    }

    Ok(())
}
