pub mod actors;
pub mod classes;
pub mod core;
pub mod dashboard;
pub mod events;
pub mod grades;
pub mod homework;
pub mod messages;
pub mod notes;
pub mod timetable;
