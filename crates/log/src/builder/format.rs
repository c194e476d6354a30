//! Format layer creation macros

/// Build a boxed `fmt` layer in `pretty` or `compact` style.
macro_rules! create_fmt_layer {
    ($kind:ident, $display:expr, $writer:expr) => {{
        let display = $display;
        let layer = tracing_subscriber::fmt::layer()
            .$kind()
            .with_writer($writer)
            .with_ansi(display.colors)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_names(display.thread_names);
        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

/// Build a boxed JSON `fmt` layer.
macro_rules! create_json_layer {
    ($display:expr, $writer:expr) => {{
        let display = $display;
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(display.flatten)
            .with_writer($writer)
            .with_ansi(false)
            .with_target(display.target)
            .with_file(display.source)
            .with_line_number(display.source)
            .with_thread_names(display.thread_names);
        if display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}
