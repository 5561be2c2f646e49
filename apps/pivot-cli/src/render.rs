use pivot_board::VariationNavigator;
use pivot_session::ReportView;
use pivot_types::game::LineSelector;

pub fn print_report(view: &mut ReportView, verbose: bool) {
    let report = view.report();
    println!(
        "{} vs {} ({})",
        report.header("White"),
        report.header("Black"),
        report.header("Result")
    );
    if !report.narrative.summary.is_empty() {
        println!("\n{}", report.narrative.summary);
    }
    if !report.narrative.themes.is_empty() {
        println!("Themes: {}", report.narrative.themes.join(", "));
    }
    if report.moments.is_empty() {
        println!("\nNo pivotal moments found.");
        return;
    }

    for idx in 0..view.navigators().len() {
        if let Some(navigator) = view.navigator_mut(idx) {
            print_moment(navigator, verbose);
        }
    }

    let plan = &view.report().narrative.training_plan;
    if !plan.is_empty() {
        println!("\nTraining plan");
        for drill in plan {
            println!("  - {} ({}): {}", drill.drill, drill.frequency, drill.how);
        }
    }
}

fn print_moment(navigator: &mut VariationNavigator, verbose: bool) {
    let moment = navigator.moment();
    println!(
        "\nPly {} ({:?} to move): played {}, best {}. {} ({:+}cp)",
        moment.ply,
        moment.side_to_move,
        moment.played_move.label,
        moment.best_move.label,
        moment.severity,
        moment.delta_cp
    );

    for line in [LineSelector::Best, LineSelector::Played] {
        navigator.select_line(line);
        println!("  {}: {}", navigator.title(), navigator.line_from_here());
        let candidates = navigator.candidate_labels();
        if !candidates.is_empty() {
            println!("    candidates: {}", candidates.join("  "));
        }
        if verbose {
            println!("    {}", navigator.current_position());
            while navigator.can_step_forward() {
                navigator.step(1);
                let (step, last) = navigator.step_counter();
                println!(
                    "    {step}/{last} {}: {}",
                    navigator.current_move_label(),
                    navigator.current_position()
                );
            }
        }
        if navigator.is_truncated() {
            println!(
                "    (line could not be replayed past move {})",
                navigator.positions().len()
            );
        }
    }
}
