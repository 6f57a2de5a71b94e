use autonav::logging::{LogConfig, LogOutput, init_logging, level_for_verbosity, parse_log_level};
use autonav::models::*;
use autonav::scenario::ScenarioConfig;
use autonav::simulation::SimulationEngine;
use clap::{Arg, Command};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("autonav")
        .version("0.1.0")
        .about("自律探索ナビゲーション (Autonomous Exploration Navigator)")
        .long_about("ローカル経路計画・探索カバレッジ・スタック回復を行うナビゲーションコアと\n\
                     それを閉ループで検証するシミュレーターです。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、使用方法を表示します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
                .conflicts_with("test")
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(clap::ArgAction::SetTrue)
                .help("ナビゲーションコンポーネントの動作確認を実行")
                .conflicts_with("info")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)。未指定時は -v から決定")
        )
        .get_matches();

    println!("自律探索ナビゲーション - autonav v0.1.0");
    println!();

    // 詳細レベルの設定
    let verbose_level = matches.get_count("verbose");
    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    // ログ設定
    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| parse_log_level(s))
        .unwrap_or_else(|| level_for_verbosity(verbose_level));

    // ガードは main の終了まで保持する
    let _log_guard = match init_logging(LogConfig {
        level,
        output,
        ..LogConfig::default()
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    // テストモードの実行
    if matches.get_flag("test") {
        println!("=== コンポーネント動作確認モード ===");
        if let Err(e) = test_components() {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // シナリオファイルの処理
    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        match run_scenario(scenario_path, matches.get_flag("info"), verbose_level) {
            Ok(_) => {
                if verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        // デフォルト動作: 利用可能なシナリオ一覧を表示
        show_default_help();
    }
}

fn test_components() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== ナビゲーションコンポーネントの確認 ===");
    let origin = Position2D::new(0.0, 0.0);

    // 経路エンジン
    let mut engine = PathfindingEngine::default();
    let path = engine.plan_path(origin, Position2D::new(100.0, 0.0));
    let cropped = engine.crop_path(&path, Position2D::new(22.0, 1.0), engine.config.crop_radius);
    println!("経路生成: {}点 / クロップ後: {}点", path.len(), cropped.len());

    let tour = engine.optimize_route_tsp(&[
        origin,
        Position2D::new(10.0, 10.0),
        Position2D::new(0.0, 10.0),
        Position2D::new(10.0, 0.0),
    ]);
    println!("巡回順序: 長さ {:.1}", PathfindingEngine::tour_length(&tour));

    // 探索プランナー
    let mut planner = ExplorationPlanner::default();
    planner.record_visited(origin);
    let frontier = planner.plan_frontier(origin, &engine, &[]).len();
    println!("発見点: {}点 / カバレッジ: {:.1}%", frontier, planner.coverage_ratio() * 100.0);

    // スタック検出器
    let mut detector = StuckDetector::default();
    let mut report = detector.check_if_stuck(origin, 50.0, 0.0);
    for i in 1..=40 {
        report = detector.check_if_stuck(origin, 50.0, i as f64 * 0.1);
    }
    println!("スタック判定: {:?} → {:?}", report.status, report.action);
    println!("回避点: {}", detector.recovery_point(origin));

    // 障害物トラッカー
    let mut tracker = ObstacleInteractionTracker::default();
    let entities = [Entity {
        id: 1,
        position: Position2D::new(8.0, 0.0),
        label: "Metadata/Terrain/Doors/Door".to_string(),
    }];
    let first = tracker.check(ObstacleCategory::Door, origin, &entities);
    let second = tracker.check(ObstacleCategory::Door, origin, &entities);
    println!(
        "障害物操作: 1回目 {} / 2回目 {}",
        first.is_some(),
        second.is_some()
    );

    println!("\n全てのコンポーネントが正常に動作しました！");
    Ok(())
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    // シナリオファイルの読み込み
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, verbose_level)
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    // 基本情報表示
    scenario.print_summary();
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // シミュレーションエンジンの作成と初期化
    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;

    let report = runtime.block_on(simulation.run())?;
    println!();
    report.print_summary();

    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  autonav [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>    シナリオファイルを指定して実行");
    println!("  -i, --info               シナリオ情報のみ表示");
    println!("  -t, --test               コンポーネントの動作確認");
    println!("  -v, --verbose            詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <TARGET> ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>  ログレベル");
    println!("  -h, --help               このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/basic_exploration.yaml        - 障害物なしの探索");
    println!("  scenarios/doors_and_transitions.yaml    - ドア・エリア遷移・外部ルート");
    println!();
    println!("例:");
    println!("  autonav -s scenarios/basic_exploration.yaml");
    println!("  autonav -s scenarios/doors_and_transitions.yaml -vv --log-output both");
    println!("  autonav -s scenarios/basic_exploration.yaml -i");
    println!("  autonav --test");
}
