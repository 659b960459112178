//! Loss-curve and prediction scatter plots

use std::path::Path;

use plotters::prelude::*;

use crate::training::metrics::{RegressionMetrics, TrainingHistory};
use crate::{AodError, Result};

const SIZE: (u32, u32) = (900, 650);

fn plot_err<E: std::fmt::Display>(e: E) -> AodError {
    AodError::Plot(e.to_string())
}

/// Train/validation/test loss against epoch
pub fn loss_curve(path: &Path, history: &TrainingHistory) -> Result<()> {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let epochs = history.epochs().max(2) as f64;
    let y_max = history
        .train_losses
        .iter()
        .chain(&history.val_losses)
        .chain(&history.test_losses)
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);
    let y_max = if y_max > 0.0 { y_max * 1.05 } else { 1.0 };

    let mut chart = ChartBuilder::on(&root)
        .caption("Loss per epoch", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(1f64..epochs, 0f64..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("Epoch")
        .y_desc("MSE loss")
        .draw()
        .map_err(plot_err)?;

    let series = [
        ("Train", &history.train_losses, RED),
        ("Validation", &history.val_losses, BLUE),
        ("Test", &history.test_losses, GREEN),
    ];
    for (label, losses, color) in series {
        let points: Vec<(f64, f64)> = losses
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| ((i + 1) as f64, *v))
            .collect();
        chart
            .draw_series(LineSeries::new(points, color.stroke_width(2)))
            .map_err(plot_err)?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    Ok(())
}

fn axis_bounds(y_true: &[f32], y_pred: &[f32]) -> (f64, f64) {
    let (lo, hi) = y_true
        .iter()
        .chain(y_pred)
        .map(|v| *v as f64)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < 1e-9 {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

/// True vs. predicted values with the identity line and metric annotations
pub fn prediction_scatter(
    path: &Path,
    title: &str,
    y_true: &[f32],
    y_pred: &[f32],
    metrics: &RegressionMetrics,
) -> Result<()> {
    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let (lo, hi) = axis_bounds(y_true, y_pred);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(lo..hi, lo..hi)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .x_desc("True AOD550")
        .y_desc("Predicted AOD550")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(
            y_true
                .iter()
                .zip(y_pred)
                .map(|(t, p)| Circle::new((*t as f64, *p as f64), 3, BLUE.mix(0.6).filled())),
        )
        .map_err(plot_err)?;
    chart
        .draw_series(LineSeries::new(vec![(lo, lo), (hi, hi)], RED.stroke_width(1)))
        .map_err(plot_err)?;

    let lines = [
        format!("MSE: {:.5}", metrics.mse),
        format!("RMSE: {:.5}", metrics.rmse),
        format!("MAE: {:.5}", metrics.mae),
        format!("R²: {:.4}", metrics.r2),
    ];
    for (i, line) in lines.iter().enumerate() {
        root.draw(&Text::new(
            line.clone(),
            (110, 70 + 20 * i as i32),
            ("sans-serif", 16).into_font(),
        ))
        .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    Ok(())
}
