use anyhow::anyhow;
use chrono::{
  Datelike,
  Duration,
  Local,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;

/// Time of day assumed for items that have a date but no time.
pub const END_OF_DAY: (u32, u32, u32) =
  (23, 59, 0);

#[must_use]
pub fn compose_due_instant(
  date: NaiveDate,
  time: Option<NaiveTime>
) -> NaiveDateTime {
  let time = time.unwrap_or_else(|| {
    NaiveTime::from_hms_opt(
      END_OF_DAY.0,
      END_OF_DAY.1,
      END_OF_DAY.2
    )
    .unwrap_or(NaiveTime::MIN)
  });
  date.and_time(time)
}

/// Wall-clock source. Due dates are stored as local wall-clock values, so
/// "now" is compared in the same frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
  timezone: Option<Tz>
}

impl Clock {
  pub fn new(
    timezone: Option<&str>
  ) -> anyhow::Result<Self> {
    let timezone = match timezone {
      | Some(raw) => {
        Some(parse_timezone(raw)?)
      }
      | None => None
    };
    Ok(Self {
      timezone
    })
  }

  pub fn timezone(&self) -> Option<Tz> {
    self.timezone
  }

  #[must_use]
  pub fn now(&self) -> NaiveDateTime {
    match self.timezone {
      | Some(tz) => {
        Utc::now()
          .with_timezone(&tz)
          .naive_local()
      }
      | None => {
        Local::now().naive_local()
      }
    }
  }

  #[must_use]
  pub fn today(&self) -> NaiveDate {
    self.now().date()
  }

  /// Milliseconds since the epoch; used for ids and `createdAt`.
  #[must_use]
  pub fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

fn parse_timezone(
  raw: &str
) -> anyhow::Result<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Err(anyhow!(
      "timezone setting is empty"
    ));
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        timezone = %trimmed,
        "configured timezone"
      );
      Ok(tz)
    }
    | Err(err) => {
      Err(anyhow!(
        "failed to parse timezone id \
         {trimmed}: {err}"
      ))
    }
  }
}

#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_due_date(
  input: &str,
  today: NaiveDate
) -> anyhow::Result<NaiveDate> {
  let lower =
    input.trim().to_ascii_lowercase();

  match lower.as_str() {
    | "today" => return Ok(today),
    | "tomorrow" => {
      return Ok(
        today + Duration::days(1)
      );
    }
    | _ => {}
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      &lower, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today, weekday
    ));
  }

  let rel_re = Regex::new(
    r"^\+(?P<n>\d+)(?P<unit>[dw])$"
  )?;
  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let n = caps["n"]
      .parse::<i64>()
      .map_err(|err| {
        anyhow!(
          "invalid offset in {input}: \
           {err}"
        )
      })?;
    let days = match &caps["unit"] {
      | "w" => n.checked_mul(7),
      | _ => Some(n)
    };
    return days
      .and_then(Duration::try_days)
      .and_then(|offset| {
        today.checked_add_signed(offset)
      })
      .ok_or_else(|| {
        anyhow!(
          "date offset out of range: \
           {input}"
        )
      });
  }

  Err(anyhow!(
    "unrecognized date '{input}': \
     expected YYYY-MM-DD, today, \
     tomorrow, +Nd, +Nw or a weekday \
     name"
  ))
}

#[tracing::instrument(fields(input = input))]
pub fn parse_due_time(
  input: &str
) -> anyhow::Result<NaiveTime> {
  let lower =
    input.trim().to_ascii_lowercase();

  match lower.as_str() {
    | "noon" => {
      return NaiveTime::from_hms_opt(
        12, 0, 0
      )
      .ok_or_else(|| {
        anyhow!("invalid time: noon")
      });
    }
    | "midnight" => {
      return Ok(NaiveTime::MIN);
    }
    | _ => {}
  }

  for fmt in ["%H:%M", "%H:%M:%S"] {
    if let Ok(time) =
      NaiveTime::parse_from_str(
        &lower, fmt
      )
    {
      return Ok(time);
    }
  }

  parse_clock_time(&lower)
    .and_then(|(hour, minute)| {
      NaiveTime::from_hms_opt(
        hour, minute, 0
      )
    })
    .ok_or_else(|| {
      anyhow!(
        "unrecognized time '{input}': \
         expected HH:MM, 3pm, 3:15pm, \
         noon or midnight"
      )
    })
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2})(:(?P<minute>\d{2}))?\s*(?P<ampm>[ap]m)$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = match captures
    .name("minute")
  {
    | Some(m) => {
      m.as_str().parse::<u32>().ok()?
    }
    | None => 0
  };
  if minute > 59
    || raw_hour == 0
    || raw_hour > 12
  {
    return None;
  }

  let hour = match captures
    .name("ampm")?
    .as_str()
    .to_ascii_lowercase()
    .as_str()
  {
    | "am" => raw_hour % 12,
    | "pm" => raw_hour % 12 + 12,
    | _ => return None
  };

  Some((hour, minute))
}

/// `YYYY-MM-DD`; an empty string or `null` reads as no date.
pub mod due_date_serde {
  use chrono::NaiveDate;
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  const FORMAT: &str = "%Y-%m-%d";

  pub fn serialize<S>(
    date: &Option<NaiveDate>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match date {
      | Some(value) => {
        serializer.serialize_str(
          &value
            .format(FORMAT)
            .to_string()
        )
      }
      | None => {
        serializer.serialize_str("")
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<NaiveDate>, D::Error>
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    match opt.as_deref().map(str::trim) {
      | None | Some("") => Ok(None),
      | Some(raw) => {
        NaiveDate::parse_from_str(
          raw, FORMAT
        )
        .map(Some)
        .map_err(serde::de::Error::custom)
      }
    }
  }
}

/// `HH:MM` (seconds accepted on read); an empty string or `null` reads as
/// no time.
pub mod due_time_serde {
  use chrono::{
    NaiveTime,
    Timelike
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  pub fn serialize<S>(
    time: &Option<NaiveTime>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match time {
      | Some(value)
        if value.second() != 0 =>
      {
        serializer.serialize_str(
          &value
            .format("%H:%M:%S")
            .to_string()
        )
      }
      | Some(value) => {
        serializer.serialize_str(
          &value
            .format("%H:%M")
            .to_string()
        )
      }
      | None => {
        serializer.serialize_str("")
      }
    }
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<Option<NaiveTime>, D::Error>
  where
    D: Deserializer<'de>
  {
    let opt =
      Option::<String>::deserialize(
        deserializer
      )?;
    match opt.as_deref().map(str::trim) {
      | None | Some("") => Ok(None),
      | Some(raw) => {
        NaiveTime::parse_from_str(
          raw, "%H:%M"
        )
        .or_else(|_| {
          NaiveTime::parse_from_str(
            raw, "%H:%M:%S"
          )
        })
        .map(Some)
        .map_err(serde::de::Error::custom)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    NaiveTime
  };

  use super::{
    compose_due_instant,
    parse_due_date,
    parse_due_time
  };

  fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(
      2024, 1, 10
    )
    .expect("valid date")
  }

  #[test]
  fn parses_relative_and_named_dates() {
    let today = wednesday();
    assert_eq!(
      parse_due_date("today", today)
        .expect("today"),
      today
    );
    assert_eq!(
      parse_due_date("+2d", today)
        .expect("offset")
        .to_string(),
      "2024-01-12"
    );
    assert_eq!(
      parse_due_date("+1w", today)
        .expect("week offset")
        .to_string(),
      "2024-01-17"
    );
    assert_eq!(
      parse_due_date("wed", today)
        .expect("weekday")
        .to_string(),
      "2024-01-17"
    );
    assert_eq!(
      parse_due_date("Friday", today)
        .expect("weekday")
        .to_string(),
      "2024-01-12"
    );
    assert!(
      parse_due_date("someday", today)
        .is_err()
    );
  }

  #[test]
  fn huge_offsets_are_errors() {
    let today = wednesday();
    for input in [
      "+100000000000000d",
      "+9223372036854775807w",
      "+99999999999999999999d"
    ] {
      assert!(
        parse_due_date(input, today)
          .is_err(),
        "{input} should be rejected"
      );
    }
  }

  #[test]
  fn parses_clock_times() {
    let expect = |h, m| {
      NaiveTime::from_hms_opt(h, m, 0)
        .expect("valid time")
    };
    assert_eq!(
      parse_due_time("09:30")
        .expect("24h"),
      expect(9, 30)
    );
    assert_eq!(
      parse_due_time("3pm")
        .expect("hour pm"),
      expect(15, 0)
    );
    assert_eq!(
      parse_due_time("12:15am")
        .expect("after midnight"),
      expect(0, 15)
    );
    assert_eq!(
      parse_due_time("noon")
        .expect("noon"),
      expect(12, 0)
    );
    assert!(
      parse_due_time("25:00").is_err()
    );
  }

  #[test]
  fn end_of_day_default() {
    let due = compose_due_instant(
      wednesday(),
      None
    );
    assert_eq!(
      due.to_string(),
      "2024-01-10 23:59:00"
    );
  }
}
