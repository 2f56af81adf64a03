use crate::error::{NNError, Result};
use log::info;
use plotters::prelude::*;

fn plot_err<E: std::fmt::Display>(e: E) -> NNError {
    NNError::PlotError(e.to_string())
}

/// Draws the per-iteration training loss on a log10 axis as an SVG file.
pub fn plot_loss_over_iterations(losses: &[f64], filename: &str) -> Result<()> {
    if losses.is_empty() {
        return Err(NNError::PlotError("no losses to plot".into()));
    }
    let root = SVGBackend::new(filename, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let iterations = losses.len();

    // Adjust losses to avoid log of zero or negative numbers
    let log_losses: Vec<f64> = losses
        .iter()
        .map(|&l| if l.is_finite() && l > 0.0 { l } else { 1e-10 })
        .map(f64::log10)
        .collect();

    let y_min = log_losses.iter().cloned().fold(f64::INFINITY, f64::min).floor();
    let mut y_max = log_losses.iter().cloned().fold(f64::NEG_INFINITY, f64::max).ceil();
    if y_max <= y_min {
        y_max = y_min + 1.0;
    }

    let mut chart = ChartBuilder::on(&root)
        .caption("Training Loss over Iterations (Log Scale)", ("sans-serif", 30).into_font())
        .margin(5)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(0..iterations, y_min..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Iteration")
        .y_desc("Loss (Log Scale)")
        .y_label_formatter(&|y| format!("1e{:.0}", y))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            log_losses.iter().enumerate().map(|(i, &l)| (i, l)),
            &BLUE,
        ))
        .map_err(plot_err)?
        .label("Regularized loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("loss plot has been saved as '{}'", filename);

    Ok(())
}
