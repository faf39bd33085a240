use crate::app::{App, AppView, OptionField, PanelState};
use netspeed::{NetworkClass, TestKind};
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

// Palette
const ACCENT: Color = Color::Rgb(100, 149, 237);
const SUCCESS: Color = Color::Rgb(134, 194, 156);
const SUCCESS_DIM: Color = Color::Rgb(80, 120, 90);
const INFO: Color = Color::Rgb(147, 180, 220);
const INFO_DIM: Color = Color::Rgb(90, 110, 140);
const WARN: Color = Color::Rgb(220, 180, 130);
const WARN_DIM: Color = Color::Rgb(130, 110, 85);
const ERROR: Color = Color::Rgb(220, 120, 120);
const TEXT_PRIMARY: Color = Color::Rgb(230, 230, 230);
const TEXT_SECONDARY: Color = Color::Rgb(160, 160, 160);
const TEXT_MUTED: Color = Color::Rgb(100, 100, 100);
const BORDER: Color = Color::Rgb(60, 60, 65);
const BORDER_ACTIVE: Color = Color::Rgb(100, 100, 110);

const KINDS: [TestKind; 3] = [TestKind::Download, TestKind::Upload, TestKind::Ping];

pub fn draw_ui(frame: &mut Frame, app: &App) {
    let [header, body, footer] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(8),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    match app.view {
        AppView::Main => {
            draw_header(frame, header, app);
            if app.expanded {
                draw_expanded(frame, body, app);
            } else {
                let panels = Layout::horizontal([Constraint::Ratio(1, 3); 3]).split(body);
                for (area, kind) in panels.iter().zip(KINDS) {
                    draw_panel(frame, *area, app, kind);
                }
            }
            draw_footer(frame, footer, main_help(app));
        }
        AppView::Options => {
            draw_title_bar(frame, header, "Options");
            draw_options(frame, body, app);
            draw_footer(frame, footer, "↑↓ select · ←→ adjust · enter done");
        }
    }
}

fn draw_title_bar(frame: &mut Frame, area: Rect, title: &str) -> Rect {
    let block = Block::default()
        .borders(Borders::BOTTOM)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(
        Paragraph::new(title.to_string())
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
        inner,
    );
    inner
}

fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
    let inner = draw_title_bar(frame, area, "netspeed");
    let [_, status_area, network_area] = Layout::horizontal([
        Constraint::Length(12),
        Constraint::Min(10),
        Constraint::Length(20),
    ])
    .areas(inner);

    let (status, color) = match (app.running, &app.status) {
        (Some((_, TestKind::Ping)), _) => ("Measuring latency...".to_string(), WARN),
        (Some((_, kind)), _) => (format!("Testing {kind}..."), palette(kind).0),
        (None, Some(status)) => (status.clone(), TEXT_SECONDARY),
        (None, None) => ("Ready".to_string(), TEXT_MUTED),
    };
    frame.render_widget(
        Paragraph::new(status)
            .style(Style::default().fg(color))
            .alignment(Alignment::Center),
        status_area,
    );

    let network_color = match app.network {
        NetworkClass::None => ERROR,
        NetworkClass::Unknown => TEXT_MUTED,
        _ => ACCENT,
    };
    let network = Line::from(vec![
        Span::styled("net ", Style::default().fg(TEXT_MUTED)),
        Span::styled(
            app.network.as_str(),
            Style::default().fg(network_color).add_modifier(Modifier::BOLD),
        ),
    ]);
    frame.render_widget(Paragraph::new(network).alignment(Alignment::Right), network_area);
}

fn palette(kind: TestKind) -> (Color, Color) {
    match kind {
        TestKind::Download => (SUCCESS, SUCCESS_DIM),
        TestKind::Upload => (INFO, INFO_DIM),
        TestKind::Ping => (WARN, WARN_DIM),
    }
}

fn title(kind: TestKind) -> &'static str {
    match kind {
        TestKind::Download => "Download",
        TestKind::Upload => "Upload",
        TestKind::Ping => "Latency",
    }
}

fn framed(frame: &mut Frame, area: Rect, kind: TestKind, active: bool) -> Rect {
    let title_color = if active { palette(kind).0 } else { TEXT_SECONDARY };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if active { BORDER_ACTIVE } else { BORDER }))
        .title(Span::styled(
            format!(" {} ", title(kind)),
            Style::default().fg(title_color),
        ));
    let inner = block.inner(area);
    frame.render_widget(block, area);
    inner
}

fn draw_panel(frame: &mut Frame, area: Rect, app: &App, kind: TestKind) {
    let panel = app.panel(kind);
    let (color, dim_color) = palette(kind);
    let inner = framed(frame, area, kind, app.selected_panel.kind() == kind);

    let [value_area, bar_area, chart_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(3),
    ])
    .areas(inner);

    let value = match &panel.error {
        Some(error) => Paragraph::new(error.clone()).style(Style::default().fg(ERROR)),
        None => Paragraph::new(headline(kind, panel))
            .style(Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD)),
    };
    frame.render_widget(value.alignment(Alignment::Center), value_area);

    if kind == TestKind::Ping {
        frame.render_widget(
            Paragraph::new(format!("jitter {} ms", jitter_text(panel)))
                .style(Style::default().fg(TEXT_MUTED))
                .alignment(Alignment::Center),
            bar_area,
        );
    } else {
        draw_progress_bar(frame, bar_area, panel.progress, color, dim_color);
    }
    draw_chart(frame, chart_area, &panel.samples, color, None);
}

fn draw_expanded(frame: &mut Frame, area: Rect, app: &App) {
    let kind = app.selected_panel.kind();
    let panel = app.panel(kind);
    let (color, dim_color) = palette(kind);
    let inner = framed(frame, area, kind, true);

    let [stats_area, bar_area, chart_area] = Layout::vertical([
        Constraint::Length(2),
        Constraint::Length(1),
        Constraint::Min(4),
    ])
    .areas(inner);

    let (avg, max, min) = get_stats(&panel.samples);
    let mut stats = vec![headline(kind, panel)];
    let unit = match kind {
        TestKind::Ping => {
            stats.push(format!("jitter {} ms", jitter_text(panel)));
            stats.extend([
                format!("avg {avg:.0}"),
                format!("max {max:.0}"),
                format!("min {min:.0}"),
            ]);
            "ms"
        }
        _ => {
            stats.extend([
                format!("avg {}", format_speed(avg)),
                format!("max {}", format_speed(max)),
                format!("min {}", format_speed(min)),
                format_bytes(panel.result.as_ref().map_or(0, |r| r.bytes)),
            ]);
            draw_progress_bar(frame, bar_area, panel.progress, color, dim_color);
            "Mbps"
        }
    };

    frame.render_widget(
        Paragraph::new(stat_line(&stats)).alignment(Alignment::Center),
        stats_area,
    );
    draw_chart(frame, chart_area, &panel.samples, color, Some(unit));
}

/// First entry bold, the rest muted and dot separated.
fn stat_line(stats: &[String]) -> Line<'static> {
    let mut spans = Vec::with_capacity(stats.len() * 2);
    for (i, stat) in stats.iter().enumerate() {
        if i == 0 {
            spans.push(Span::styled(
                stat.clone(),
                Style::default().fg(TEXT_PRIMARY).add_modifier(Modifier::BOLD),
            ));
        } else {
            spans.push(Span::styled("  ·  ", Style::default().fg(TEXT_MUTED)));
            spans.push(Span::styled(stat.clone(), Style::default().fg(TEXT_SECONDARY)));
        }
    }
    Line::from(spans)
}

fn draw_progress_bar(frame: &mut Frame, area: Rect, ratio: f64, color: Color, dim_color: Color) {
    if area.width < 4 {
        return;
    }
    let width = (area.width - 2) as usize;
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64) as usize).min(width);

    let bar = Line::from(vec![
        Span::raw(" "),
        Span::styled("━".repeat(filled), Style::default().fg(color)),
        Span::styled("━".repeat(width - filled), Style::default().fg(dim_color)),
    ]);
    frame.render_widget(Paragraph::new(bar), area);
}

fn line_dataset(points: &[(f64, f64)], color: Color) -> Dataset<'_> {
    Dataset::default()
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(points)
}

/// Line chart of `data`. With a unit it gets a labelled y axis and a mean line.
fn draw_chart(frame: &mut Frame, area: Rect, data: &[f64], color: Color, unit: Option<&str>) {
    let (min_width, min_height) = if unit.is_some() { (10, 3) } else { (4, 2) };
    if data.is_empty() || area.width < min_width || area.height < min_height {
        return;
    }

    let (lo, hi) = get_data_range(data);
    let pad = (hi - lo).max(if unit.is_some() { 0.1 } else { 1.0 }) * 0.1;
    let y_bounds = [(lo - pad).max(0.0), hi + pad];
    let x_bounds = [0.0, data.len() as f64];

    let points: Vec<(f64, f64)> = data.iter().enumerate().map(|(i, &v)| (i as f64, v)).collect();
    let (avg, _, _) = get_stats(data);
    let mean = [(0.0, avg), (data.len() as f64, avg)];

    let mut datasets = vec![line_dataset(&points, color)];
    let mut x_axis = Axis::default().bounds(x_bounds);
    let mut y_axis = Axis::default().bounds(y_bounds);
    if let Some(unit) = unit {
        datasets.push(line_dataset(&mean, TEXT_MUTED));
        x_axis = x_axis.style(Style::default().fg(BORDER));
        y_axis = y_axis.style(Style::default().fg(BORDER)).labels(vec![
            Span::styled(format!("{:.0}", y_bounds[0]), Style::default().fg(TEXT_MUTED)),
            Span::styled(format!("{:.0} {unit}", y_bounds[1]), Style::default().fg(TEXT_MUTED)),
        ]);
    }

    frame.render_widget(Chart::new(datasets).x_axis(x_axis).y_axis(y_axis), area);
}

fn draw_options(frame: &mut Frame, area: Rect, app: &App) {
    let [_, content, _] = Layout::horizontal([
        Constraint::Length(2),
        Constraint::Min(30),
        Constraint::Length(2),
    ])
    .areas(area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(BORDER));
    let inner = block.inner(content);
    frame.render_widget(block, content);

    let options = &app.options;
    let rows = [
        (OptionField::PingCount, "Ping probes", options.ping_count.to_string()),
        (OptionField::Duration, "Test duration", format!("{} s", options.duration_secs)),
        (OptionField::ReportInterval, "Report every", format!("{} ms", options.report_interval_ms)),
    ];
    let areas = Layout::vertical([Constraint::Length(3); 3]).split(inner);

    for ((field, label, value), row) in rows.into_iter().zip(areas.iter()) {
        let selected = app.selected_option == field;
        let [label_area, value_area] =
            Layout::horizontal([Constraint::Length(16), Constraint::Min(10)]).areas(*row);

        let (label_color, value, value_color) = if selected {
            (ACCENT, format!("< {value} >"), TEXT_PRIMARY)
        } else {
            (TEXT_SECONDARY, value, TEXT_MUTED)
        };
        frame.render_widget(
            Paragraph::new(format!(" {label}")).style(Style::default().fg(label_color)),
            label_area,
        );
        frame.render_widget(
            Paragraph::new(value).style(Style::default().fg(value_color)),
            value_area,
        );
    }
}

fn main_help(app: &App) -> &'static str {
    if app.expanded {
        "esc close · q quit"
    } else if app.is_idle() {
        "enter run · a run all · n network · o options · tab select · space expand · q quit"
    } else {
        "tab select · space expand · esc cancel · q quit"
    }
}

fn draw_footer(frame: &mut Frame, area: Rect, help: &str) {
    frame.render_widget(
        Paragraph::new(help.to_string())
            .style(Style::default().fg(TEXT_MUTED))
            .alignment(Alignment::Center),
        area,
    );
}

/// Result value once the test is done, the latest sample before that.
fn headline(kind: TestKind, panel: &PanelState) -> String {
    let latest = panel.samples.last().copied().unwrap_or(0.0);
    match kind {
        TestKind::Ping => {
            let ms = panel.result.as_ref().and_then(|r| r.latency_ms).unwrap_or(latest);
            if ms > 0.0 {
                format!("{ms:.0} ms")
            } else {
                "—".to_string()
            }
        }
        _ => format_speed(panel.result.as_ref().map_or(latest, |r| r.speed_mbps)),
    }
}

fn jitter_text(panel: &PanelState) -> String {
    panel
        .result
        .as_ref()
        .and_then(|r| r.jitter_ms)
        .map_or_else(|| "—".to_string(), |j| format!("{j:.1}"))
}

fn get_data_range(data: &[f64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

fn get_stats(data: &[f64]) -> (f64, f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let avg = data.iter().sum::<f64>() / data.len() as f64;
    let (min, max) = get_data_range(data);
    (avg, max, min)
}

fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 1.0 {
        format!("{:.1} Mbps", mbps)
    } else if mbps > 0.0 {
        format!("{:.0} Kbps", mbps * 1000.0)
    } else {
        "—".to_string()
    }
}

fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= 1e9 {
        format!("{:.2} GB", b / 1e9)
    } else if b >= 1e6 {
        format!("{:.1} MB", b / 1e6)
    } else if b >= 1e3 {
        format!("{:.0} KB", b / 1e3)
    } else {
        format!("{bytes} B")
    }
}
