//! Diagnostic plots for the motion metrics.
//!
//! Rendered as PNG next to the other intermediates so a reviewer can eyeball
//! which frames were flagged and how close the rest sat to the thresholds.

use std::path::Path;

use plotters::prelude::*;

use crate::error::PipelineError;
use crate::motion::MotionMetricSeries;

const PLOT_SIZE: (u32, u32) = (1200, 700);

fn plot_error(path: &Path, detail: impl ToString) -> PipelineError {
    PipelineError::Plot {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

fn y_max(values: &[f64], threshold: f64) -> f64 {
    let data_max = values.iter().cloned().fold(0.0, f64::max);
    data_max.max(threshold) * 1.1 + f64::EPSILON
}

/// Plot one metric series with its threshold as a horizontal line.
pub fn plot_metric_series(
    series: &MotionMetricSeries,
    title: &str,
    out_path: &Path,
) -> Result<(), PipelineError> {
    let root = BitMapBackend::new(out_path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(out_path, e))?;

    let n = series.len().max(2);
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0usize..n - 1, 0.0..y_max(&series.values, series.threshold))
        .map_err(|e| plot_error(out_path, e))?;

    chart
        .configure_mesh()
        .x_desc("frame")
        .y_desc(title)
        .draw()
        .map_err(|e| plot_error(out_path, e))?;

    chart
        .draw_series(LineSeries::new(
            series.values.iter().copied().enumerate(),
            &BLUE,
        ))
        .map_err(|e| plot_error(out_path, e))?;
    chart
        .draw_series(LineSeries::new(
            [(0, series.threshold), (n - 1, series.threshold)],
            &RED,
        ))
        .map_err(|e| plot_error(out_path, e))?;

    root.present().map_err(|e| plot_error(out_path, e))?;
    Ok(())
}

/// Overlay FD (left axis) and DVARS (right axis) with their thresholds, the
/// usual side-by-side view for judging whether the two metrics agree.
pub fn plot_fd_vs_dvars(
    fd: &MotionMetricSeries,
    dvars: &MotionMetricSeries,
    out_path: &Path,
) -> Result<(), PipelineError> {
    let root = BitMapBackend::new(out_path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_error(out_path, e))?;

    let n = fd.len().max(dvars.len()).max(2);
    let mut chart = ChartBuilder::on(&root)
        .caption("Frame displacement vs DVARS", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .right_y_label_area_size(60)
        .build_cartesian_2d(0usize..n - 1, 0.0..y_max(&fd.values, fd.threshold))
        .map_err(|e| plot_error(out_path, e))?
        .set_secondary_coord(0usize..n - 1, 0.0..y_max(&dvars.values, dvars.threshold));

    chart
        .configure_mesh()
        .x_desc("frame")
        .y_desc("FD (mm)")
        .draw()
        .map_err(|e| plot_error(out_path, e))?;
    chart
        .configure_secondary_axes()
        .y_desc("DVARS")
        .draw()
        .map_err(|e| plot_error(out_path, e))?;

    chart
        .draw_series(LineSeries::new(fd.values.iter().copied().enumerate(), &BLUE))
        .map_err(|e| plot_error(out_path, e))?
        .label("FD")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(
            [(0, fd.threshold), (n - 1, fd.threshold)],
            BLUE.stroke_width(1),
        ))
        .map_err(|e| plot_error(out_path, e))?;

    chart
        .draw_secondary_series(LineSeries::new(
            dvars.values.iter().copied().enumerate(),
            &RED,
        ))
        .map_err(|e| plot_error(out_path, e))?
        .label("DVARS")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    chart
        .draw_secondary_series(LineSeries::new(
            [(0, dvars.threshold), (n - 1, dvars.threshold)],
            RED.stroke_width(1),
        ))
        .map_err(|e| plot_error(out_path, e))?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| plot_error(out_path, e))?;

    root.present().map_err(|e| plot_error(out_path, e))?;
    Ok(())
}
