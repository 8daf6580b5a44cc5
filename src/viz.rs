//! Training report output: console summary and a churn-by-segment chart

use crate::train::TrainingReport;
use plotters::prelude::*;
use std::path::Path;

const RETAINED_COLOR: RGBColor = RGBColor(70, 130, 180);
const CHURNED_COLOR: RGBColor = RGBColor(220, 80, 60);

/// Churned and retained customer counts of one segment
fn split_counts(size: usize, churn_rate: f64) -> (usize, usize) {
    let churned = ((size as f64 * churn_rate).round() as usize).min(size);
    (size - churned, churned)
}

/// Draw stacked bars of retained and churned customers per segment as SVG
///
/// # Arguments
/// * `report` - Report returned by [`crate::train::train`]
/// * `output_path` - Destination `.svg` file
pub fn churn_by_segment_chart(report: &TrainingReport, output_path: &Path) -> crate::Result<()> {
    if report.segments.is_empty() {
        anyhow::bail!("Report has no segments to draw");
    }
    let n_segments = report.segments.len();
    let max_size = report.segments.iter().map(|s| s.size).max().unwrap_or(1).max(1) as f64;

    let root = SVGBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Churn by Segment", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(n_segments as f64 - 0.5), 0f64..(max_size * 1.1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n_segments)
        .x_label_formatter(&|x| format!("{:.0}", x))
        .x_desc("Segment")
        .y_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    let bars: Vec<(f64, usize, usize)> = report
        .segments
        .iter()
        .map(|s| {
            let (retained, churned) = split_counts(s.size, s.churn_rate);
            (s.segment as f64, retained, churned)
        })
        .collect();

    chart
        .draw_series(bars.iter().map(|&(x, retained, _)| {
            Rectangle::new([(x - 0.35, 0.0), (x + 0.35, retained as f64)], RETAINED_COLOR.filled())
        }))?
        .label("Retained")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], RETAINED_COLOR.filled()));

    chart
        .draw_series(bars.iter().map(|&(x, retained, churned)| {
            Rectangle::new(
                [
                    (x - 0.35, retained as f64),
                    (x + 0.35, (retained + churned) as f64),
                ],
                CHURNED_COLOR.filled(),
            )
        }))?
        .label("Churned")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], CHURNED_COLOR.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Print model metrics and segment statistics to the console
pub fn print_training_report(report: &TrainingReport) {
    println!("\n=== Model Evaluation ===");
    println!(
        "Train rows: {}, held-out rows: {}",
        report.train_rows, report.test_rows
    );
    for evaluation in &report.evaluations {
        println!(
            "  {:13} | accuracy {:.3} | MCC {:.3}",
            evaluation.model.as_str(),
            evaluation.accuracy,
            evaluation.mcc
        );
    }

    let total: usize = report.segments.iter().map(|s| s.size).sum();
    println!("\n=== Segment Statistics ===");
    println!("Within-segment sum of squares (Inertia): {:.2}", report.inertia);
    println!("Silhouette score (sample): {:.3}", report.silhouette);
    println!("\n  Segment | Customers |  Share | Churn rate");
    println!("  --------|-----------|--------|-----------");
    for segment in &report.segments {
        let share = if total == 0 {
            0.0
        } else {
            segment.size as f64 / total as f64 * 100.0
        };
        println!(
            "  {:7} | {:9} | {:5.1}% | {:9.1}%",
            segment.segment,
            segment.size,
            share,
            segment.churn_rate * 100.0
        );
    }
}
