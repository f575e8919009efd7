#![cfg(not(tarpaulin_include))]

use plotters::coord::Shift;
use plotters::prelude::*;
use serde::Deserialize;

use crate::analytics::{DashboardAnalytics, MonthBucket, NamedCount};
use crate::error::{Error, Result};
use crate::record::Status;

/// Dashboard charts that can be rendered
///
/// Each kind reads one section of [`DashboardAnalytics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    /// Bar per workflow status, coloured like the dashboard badges
    Status,

    /// Submissions, approvals and rejections per month as lines
    Monthly,

    /// Record count per engineer (top ten)
    Engineers,

    /// Record count per bank
    Banks,

    /// Record count per city
    Cities,

    /// Paid, unpaid and unspecified records
    Payment,
}

impl ChartKind {
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.to_ascii_lowercase().as_str() {
            "status" => Some(ChartKind::Status),
            "monthly" => Some(ChartKind::Monthly),
            "engineers" => Some(ChartKind::Engineers),
            "banks" => Some(ChartKind::Banks),
            "cities" => Some(ChartKind::Cities),
            "payment" => Some(ChartKind::Payment),
            _ => None,
        }
    }

    fn default_title(&self) -> &'static str {
        match self {
            ChartKind::Status => "Records by status",
            ChartKind::Monthly => "Monthly submissions",
            ChartKind::Engineers => "Records per engineer",
            ChartKind::Banks => "Records per bank",
            ChartKind::Cities => "Records per city",
            ChartKind::Payment => "Payment status",
        }
    }
}

/// Configuration options for chart generation
///
/// All fields can be supplied as query parameters on the graph endpoint.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Title displayed at the top of the chart; each kind has its own default
    pub title: Option<String>,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    /// Creates the default 800x600 configuration with the kind's own title
    fn default() -> Self {
        Self {
            title: None,
            width: 800,
            height: 600,
        }
    }
}

const MIN_WIDTH: u32 = 200;
const MIN_HEIGHT: u32 = 150;
const MAX_SIDE: u32 = 4000;

/// One labelled bar
struct Bar {
    label: String,
    value: usize,
    color: RGBColor,
}

fn status_color(status: Status) -> RGBColor {
    match status {
        Status::Pending => RGBColor(245, 158, 11),
        Status::OnProgress => RGBColor(59, 130, 246),
        Status::Approved => RGBColor(34, 197, 94),
        Status::Rejected => RGBColor(239, 68, 68),
        Status::Rework => RGBColor(168, 85, 247),
    }
}

fn named_bars(counts: &[NamedCount]) -> Vec<Bar> {
    counts
        .iter()
        .map(|c| Bar {
            label: c.name.clone(),
            value: c.count,
            color: BLUE,
        })
        .collect()
}

/// Renders a dashboard chart as an SVG document
///
/// This is the main entry point for chart generation. It picks the data
/// series for `kind` out of the analytics and draws it on an SVG backend.
///
/// # Arguments
/// * `kind` - Which chart to draw
/// * `analytics` - Analytics computed from the merged record list
/// * `options` - Title and size overrides
///
/// # Returns
/// * A Result containing the SVG markup or an error
///
/// # Examples
/// ```
/// use valuation_desk::analytics::DashboardAnalytics;
/// use valuation_desk::graph::{ChartKind, GraphOptions, render_chart};
///
/// let analytics = DashboardAnalytics::from_records(&[]);
/// let svg = render_chart(ChartKind::Status, &analytics, &GraphOptions::default()).unwrap();
/// assert!(svg.starts_with("<svg"));
/// ```
pub fn render_chart(
    kind: ChartKind,
    analytics: &DashboardAnalytics,
    options: &GraphOptions,
) -> Result<String> {
    if !(MIN_WIDTH..=MAX_SIDE).contains(&options.width)
        || !(MIN_HEIGHT..=MAX_SIDE).contains(&options.height)
    {
        return Err(Error::Validation(format!(
            "chart size {}x{} out of range",
            options.width, options.height
        )));
    }
    let title = options
        .title
        .clone()
        .unwrap_or_else(|| kind.default_title().to_string());

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        match kind {
            ChartKind::Status => {
                let bars: Vec<Bar> = [
                    Status::Pending,
                    Status::OnProgress,
                    Status::Approved,
                    Status::Rejected,
                    Status::Rework,
                ]
                .into_iter()
                .map(|status| Bar {
                    label: status.as_str().to_string(),
                    value: analytics.status_counts.get(status),
                    color: status_color(status),
                })
                .collect();
                draw_bars(&root, &title, "Status", &bars)?;
            }
            ChartKind::Engineers => {
                let bars: Vec<Bar> = analytics
                    .engineers
                    .iter()
                    .map(|e| Bar {
                        label: e.name.clone(),
                        value: e.total,
                        color: BLUE,
                    })
                    .collect();
                draw_bars(&root, &title, "Engineer", &bars)?;
            }
            ChartKind::Banks => draw_bars(&root, &title, "Bank", &named_bars(&analytics.banks))?,
            ChartKind::Cities => draw_bars(&root, &title, "City", &named_bars(&analytics.cities))?,
            ChartKind::Payment => {
                let split = &analytics.payment_split;
                let bars = [
                    ("paid", split.yes, status_color(Status::Approved)),
                    ("unpaid", split.no, status_color(Status::Rejected)),
                    ("unspecified", split.unspecified, RGBColor(156, 163, 175)),
                ]
                .map(|(label, value, color)| Bar {
                    label: label.to_string(),
                    value,
                    color,
                });
                draw_bars(&root, &title, "Payment", &bars)?;
            }
            ChartKind::Monthly => draw_trend(&root, &title, analytics)?,
        }

        root.present()?;
    }

    Ok(svg)
}

/// Draws a categorical bar chart
///
/// # Implementation Notes
/// * Uses a segmented x axis so each label sits under the centre of its bar
/// * The y axis is padded by 10% above the tallest bar
fn draw_bars(
    root: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    x_desc: &str,
    bars: &[Bar],
) -> Result<()> {
    let slots = bars.len().max(1) as u32;
    let max_y = bars.iter().map(|b| b.value).max().unwrap_or(0).max(1) as f64 * 1.1;

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0u32..slots).into_segmented(), 0f64..max_y)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc(x_desc)
        .y_desc("Records")
        .x_labels(bars.len().max(1))
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => bars
                .get(*i as usize)
                .map(|b| b.label.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|y| format!("{:.0}", y))
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, bar)| {
        let i = i as u32;
        Rectangle::new(
            [
                (SegmentValue::Exact(i), 0.0),
                (SegmentValue::Exact(i + 1), bar.value as f64),
            ],
            bar.color.filled(),
        )
    }))?;

    Ok(())
}

/// Draws the monthly trend with one line per series and a legend
fn draw_trend(
    root: &DrawingArea<SVGBackend<'_>, Shift>,
    title: &str,
    analytics: &DashboardAnalytics,
) -> Result<()> {
    let months = &analytics.monthly_trend;
    let slots = months.len().max(1) as u32;
    let max_y = months
        .iter()
        .map(|m| m.submissions)
        .max()
        .unwrap_or(0)
        .max(1) as f64
        * 1.1;

    let mut chart = ChartBuilder::on(root)
        .caption(title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0u32..slots).into_segmented(), 0f64..max_y)?;

    chart
        .configure_mesh()
        .x_desc("Month")
        .y_desc("Records")
        .x_labels(months.len().max(1))
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => months
                .get(*i as usize)
                .map(|m| m.month.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|y| format!("{:.0}", y))
        .draw()?;

    let series: [(&str, RGBColor, fn(&MonthBucket) -> usize); 3] = [
        ("Submitted", BLUE, |m| m.submissions),
        ("Approved", status_color(Status::Approved), |m| m.approved),
        ("Rejected", status_color(Status::Rejected), |m| m.rejected),
    ];
    for (name, color, value) in series {
        chart
            .draw_series(LineSeries::new(
                months
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (SegmentValue::CenterOf(i as u32), value(m) as f64)),
                color.stroke_width(2),
            ))?
            .label(name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    Ok(())
}
