#![cfg(not(tarpaulin_include))]

//! Server-rendered SVG charts for the maps and the weekly bar series.

use std::ops::Range;

use plotters::prelude::*;

use crate::aggregate::{MapFigure, MarkerKind, Metric, WeeklySeries};

/// Trace colours, cycled in trace order
pub const PALETTE: [RGBColor; 10] = [
    RGBColor(0x63, 0x6E, 0xFA),
    RGBColor(0xEF, 0x55, 0x3B),
    RGBColor(0x00, 0xCC, 0x96),
    RGBColor(0xAB, 0x63, 0xFA),
    RGBColor(0xFF, 0xA1, 0x5A),
    RGBColor(0x19, 0xD3, 0xF3),
    RGBColor(0xFF, 0x66, 0x92),
    RGBColor(0xB6, 0xE8, 0x80),
    RGBColor(0xFF, 0x97, 0xFF),
    RGBColor(0xFE, 0xCB, 0x52),
];

/// Continental US, the default map viewport
const US_LONGITUDE: Range<f64> = -125.0..-66.0;
const US_LATITUDE: Range<f64> = 24.0..50.0;

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Label for the X-axis
    pub x_label: String,

    /// Label for the Y-axis
    pub y_label: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            x_label: String::new(),
            y_label: String::new(),
            width: 900,
            height: 520,
        }
    }
}

impl ChartOptions {
    pub fn map() -> Self {
        Self {
            x_label: "Longitude".to_string(),
            y_label: "Latitude".to_string(),
            ..Self::default()
        }
    }

    pub fn weekly() -> Self {
        Self {
            x_label: "Week".to_string(),
            width: 560,
            height: 340,
            ..Self::default()
        }
    }
}

/// Viewport covering the continental US plus any point outside it.
pub fn map_bounds(figure: &MapFigure) -> (Range<f64>, Range<f64>) {
    let mut lon = US_LONGITUDE;
    let mut lat = US_LATITUDE;
    for point in figure.traces.iter().flat_map(|t| t.points.iter()) {
        lon.start = lon.start.min(point.longitude - 1.0);
        lon.end = lon.end.max(point.longitude + 1.0);
        lat.start = lat.start.min(point.latitude - 1.0);
        lat.end = lat.end.max(point.latitude + 1.0);
    }
    (lon, lat)
}

/// Circle radius in pixels for a marker diameter.
pub fn marker_radius(size: f64) -> i32 {
    ((size / 2.0).round() as i32).clamp(2, 60)
}

/// Renders a map figure as SVG
///
/// Bubble traces are drawn as translucent circles sized by the point value,
/// diamond traces as fixed-size diamonds. Every trace gets a legend entry.
///
/// # Arguments
/// * `figure` - Traces computed by the aggregation layer
/// * `options` - Chart styling options
///
/// # Returns
/// * A Result containing the SVG document or an error
pub fn render_map(
    figure: &MapFigure,
    options: &ChartOptions,
) -> Result<String, Box<dyn std::error::Error>> {
    let (lon, lat) = map_bounds(figure);
    // Diamond half-extent in degrees
    let dx = (lon.end - lon.start) / 150.0;
    let dy = (lat.end - lat.start) / 90.0;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&figure.title, ("sans-serif", 24).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d(lon, lat)?;

        chart
            .configure_mesh()
            .disable_mesh()
            .x_desc(&options.x_label)
            .y_desc(&options.y_label)
            .draw()?;

        for (i, trace) in figure.traces.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            let anno = match trace.marker {
                MarkerKind::Bubble => chart.draw_series(trace.points.iter().map(|p| {
                    Circle::new(
                        (p.longitude, p.latitude),
                        marker_radius(p.size),
                        color.mix(0.6).filled(),
                    )
                }))?,
                MarkerKind::Diamond => chart.draw_series(trace.points.iter().map(|p| {
                    let (x, y) = (p.longitude, p.latitude);
                    Polygon::new(
                        vec![(x, y + dy), (x + dx, y), (x, y - dy), (x - dx, y)],
                        color.filled(),
                    )
                }))?,
            };
            anno.label(trace.name.as_str())
                .legend(move |(x, y)| Circle::new((x + 8, y), 5, color.filled()));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::LowerLeft)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
    }

    Ok(svg)
}

/// Renders one metric of a weekly series as an SVG bar chart
///
/// Weeks are shown as categories in ascending order with the value printed
/// above each bar.
///
/// # Arguments
/// * `series` - Per-week tallies for one developer or for everyone
/// * `metric` - The tally to plot
/// * `options` - Chart styling options
///
/// # Returns
/// * A Result containing the SVG document or an error
pub fn render_weekly(
    series: &WeeklySeries,
    metric: Metric,
    options: &ChartOptions,
) -> Result<String, Box<dyn std::error::Error>> {
    let bars = series.bars(metric);
    let weeks: Vec<String> = bars.iter().map(|(week, _)| week.to_string()).collect();
    let categories = bars.len().max(1) as i32;
    let y_max = bars.iter().map(|(_, v)| *v).max().unwrap_or(0).max(1);
    let title = series.title(metric);
    let y_label = if options.y_label.is_empty() {
        metric.column_name()
    } else {
        options.y_label.as_str()
    };
    let color = PALETTE[Metric::ALL.iter().position(|m| *m == metric).unwrap_or(0)];

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&title, ("sans-serif", 20).into_font())
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(40)
            .build_cartesian_2d((0..categories).into_segmented(), 0u64..y_max + y_max / 5 + 1)?;

        let label_week = |v: &SegmentValue<i32>| match v {
            SegmentValue::CenterOf(i) => weeks.get(*i as usize).cloned().unwrap_or_default(),
            _ => String::new(),
        };
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(weeks.len().max(1))
            .x_label_formatter(&label_week)
            .x_desc(&options.x_label)
            .y_desc(y_label)
            .draw()?;

        chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
            let i = i as i32;
            let mut bar = Rectangle::new(
                [(SegmentValue::Exact(i), 0), (SegmentValue::Exact(i + 1), *value)],
                color.filled(),
            );
            bar.set_margin(0, 0, 6, 6);
            bar
        }))?;

        chart.draw_series(bars.iter().enumerate().map(|(i, (_, value))| {
            Text::new(
                value.to_string(),
                (SegmentValue::CenterOf(i as i32), *value),
                ("sans-serif", 12).into_font(),
            )
        }))?;

        root.present()?;
    }

    Ok(svg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{MapPoint, MapTrace};

    fn figure(points: Vec<(f64, f64)>) -> MapFigure {
        MapFigure {
            title: "Test".to_string(),
            traces: vec![MapTrace {
                name: "Demo".to_string(),
                marker: MarkerKind::Bubble,
                points: points
                    .into_iter()
                    .map(|(longitude, latitude)| MapPoint {
                        longitude,
                        latitude,
                        developer: "Ana".to_string(),
                        hover: "1".to_string(),
                        size: 4.0,
                    })
                    .collect(),
            }],
        }
    }

    #[test]
    fn test_map_bounds_default_to_us() {
        let (lon, lat) = map_bounds(&figure(vec![(-105.0, 39.7)]));
        assert_eq!(lon, US_LONGITUDE);
        assert_eq!(lat, US_LATITUDE);
    }

    #[test]
    fn test_map_bounds_grow_for_outliers() {
        let (lon, lat) = map_bounds(&figure(vec![(-149.9, 61.2)]));
        assert!(lon.start < -149.9);
        assert_eq!(lon.end, US_LONGITUDE.end);
        assert!(lat.end > 61.2);
    }

    #[test]
    fn test_marker_radius() {
        assert_eq!(marker_radius(0.0), 2);
        assert_eq!(marker_radius(20.0), 10);
        assert_eq!(marker_radius(1_000.0), 60);
    }
}
