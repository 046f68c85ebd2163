use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

const WEEKDAY_HEADERS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub class_id: Option<String>,
}

/// Month-grid renderer. The date map is built once from the full event set;
/// rendering any (year, month) after that reuses it. Events keep the order
/// they were supplied in, per date.
pub struct EventCalendar {
    events: Vec<CalendarEvent>,
    by_date: HashMap<NaiveDate, Vec<usize>>,
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => 30,
    }
}

/// Monday-first week rows for one month. `None` cells are filler days that
/// belong to the neighbouring months.
pub fn month_grid(year: i32, month: u32) -> Vec<Vec<Option<u32>>> {
    let first = match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(d) => d,
        None => return Vec::new(),
    };
    let lead = first.weekday().num_days_from_monday() as usize;
    let days = days_in_month(year, month);

    let mut weeks: Vec<Vec<Option<u32>>> = Vec::new();
    let mut week: Vec<Option<u32>> = vec![None; lead];
    for day in 1..=days {
        week.push(Some(day));
        if week.len() == 7 {
            weeks.push(week);
            week = Vec::new();
        }
    }
    if !week.is_empty() {
        while week.len() < 7 {
            week.push(None);
        }
        weeks.push(week);
    }
    weeks
}

impl EventCalendar {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        let mut by_date: HashMap<NaiveDate, Vec<usize>> = HashMap::new();
        for (i, ev) in events.iter().enumerate() {
            by_date.entry(ev.date).or_default().push(i);
        }
        Self { events, by_date }
    }

    pub fn events_on(&self, date: NaiveDate) -> Vec<&CalendarEvent> {
        self.by_date
            .get(&date)
            .map(|idxs| idxs.iter().map(|&i| &self.events[i]).collect())
            .unwrap_or_default()
    }

    /// Renders a traditional month table. Each in-month day gets a `<td>`
    /// listing its events through `fmt`; filler cells render as
    /// `<td class="noday">&nbsp;</td>`. A month with no events still renders
    /// every cell.
    pub fn render_month<F>(&self, year: i32, month: u32, fmt: F) -> String
    where
        F: Fn(&CalendarEvent) -> String,
    {
        let mut out = String::new();
        out.push_str("<table border=\"0\" cellpadding=\"0\" cellspacing=\"0\" class=\"month\">\n");
        let month_name = MONTH_NAMES
            .get((month as usize).wrapping_sub(1))
            .copied()
            .unwrap_or("");
        out.push_str(&format!(
            "<tr><th colspan=\"7\" class=\"month-head\">{} {}</th></tr>\n",
            month_name, year
        ));
        out.push_str("<tr>");
        for h in WEEKDAY_HEADERS {
            out.push_str(&format!("<th class=\"day-head\">{}</th>", h));
        }
        out.push_str("</tr>\n");

        for week in month_grid(year, month) {
            out.push_str("<tr>");
            for cell in week {
                match cell {
                    None => out.push_str("<td class=\"noday\">&nbsp;</td>"),
                    Some(day) => {
                        out.push_str(&format!("<td class=\"day\"><span>{}</span>", day));
                        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                            let rendered: Vec<String> =
                                self.events_on(date).into_iter().map(&fmt).collect();
                            if !rendered.is_empty() {
                                out.push_str("<ul>");
                                for r in &rendered {
                                    out.push_str(&format!("<li>{}</li>", r));
                                }
                                out.push_str("</ul>");
                            }
                        }
                        out.push_str("</td>");
                    }
                }
            }
            out.push_str("</tr>\n");
        }
        out.push_str("</table>\n");
        out
    }
}
